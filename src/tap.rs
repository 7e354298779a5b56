//! Passive JTAG TAP tracker.
//!
//! [`Tap`] follows the 16-state TAP controller from the sampled TMS line,
//! shifts the instruction and data registers from the sampled TDI/TDO lines
//! and reports the IDCODE and PDICOM data register updates it observes.

use std::collections::VecDeque;
use std::fmt;

use crate::bits::{PdiFrame, SerialFrame, ShiftRegister};

/// TAP controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TapState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

impl TapState {
    pub const ALL: [TapState; 16] = [
        TapState::Reset,
        TapState::Idle,
        TapState::SelectDR,
        TapState::CaptureDR,
        TapState::ShiftDR,
        TapState::Exit1DR,
        TapState::PauseDR,
        TapState::Exit2DR,
        TapState::UpdateDR,
        TapState::SelectIR,
        TapState::CaptureIR,
        TapState::ShiftIR,
        TapState::Exit1IR,
        TapState::PauseIR,
        TapState::Exit2IR,
        TapState::UpdateIR,
    ];

    /// The state entered on the next bus clock edge.
    pub fn next(self, tms: bool, graph: &TapGraph) -> TapState {
        use TapState::*;

        let captured = graph.kind == GraphKind::Captured;
        match (self, tms) {
            (Reset, false) => Idle,
            (Reset, true) => Reset,
            (Idle, false) => Idle,
            (Idle, true) => SelectDR,

            (SelectDR, false) => CaptureDR,
            (SelectDR, true) => SelectIR,
            (CaptureDR, false) if captured => Exit1DR,
            (CaptureDR, true) if captured => ShiftDR,
            (CaptureDR, false) => ShiftDR,
            (CaptureDR, true) => Exit1DR,
            (ShiftDR, false) => ShiftDR,
            (ShiftDR, true) => Exit1DR,
            (Exit1DR, false) => PauseDR,
            (Exit1DR, true) => UpdateDR,
            (PauseDR, false) => PauseDR,
            (PauseDR, true) => Exit2DR,
            (Exit2DR, false) => ShiftDR,
            (Exit2DR, true) => UpdateDR,
            (UpdateDR, false) => Idle,
            (UpdateDR, true) => SelectDR,

            (SelectIR, false) if graph.select_ir_quirk => CaptureDR,
            (SelectIR, false) => CaptureIR,
            (SelectIR, true) => Reset,
            (CaptureIR, false) if captured => Exit1IR,
            (CaptureIR, true) if captured => ShiftIR,
            (CaptureIR, false) => ShiftIR,
            (CaptureIR, true) => Exit1IR,
            (ShiftIR, false) => ShiftIR,
            (ShiftIR, true) => Exit1IR,
            (Exit1IR, false) => PauseIR,
            (Exit1IR, true) => UpdateIR,
            (PauseIR, false) => PauseIR,
            (PauseIR, true) => Exit2IR,
            (Exit2IR, false) => ShiftIR,
            (Exit2IR, true) => UpdateIR,
            (UpdateIR, false) => Idle,
            (UpdateIR, true) => SelectDR,
        }
    }

    /// The shortest TMS sequence that walks the controller from `self` to
    /// `target`, or `None` if `target` cannot be reached under `graph`.
    pub fn path_to(self, target: TapState, graph: &TapGraph) -> Option<Vec<bool>> {
        if self == target {
            return Some(Vec::new());
        }

        let mut visited = [false; 16];
        let mut paths = VecDeque::new();
        visited[self as usize] = true;
        paths.push_back((self, Vec::new()));

        while let Some((state, path)) = paths.pop_front() {
            for &tms in [false, true].iter() {
                let next = state.next(tms, graph);
                if visited[next as usize] {
                    continue;
                }
                visited[next as usize] = true;

                let mut path = path.clone();
                path.push(tms);
                if next == target {
                    return Some(path);
                }
                paths.push_back((next, path));
            }
        }

        None
    }
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TapState::Reset => "RESET",
            TapState::Idle => "IDLE",
            TapState::SelectDR => "SELECT-DR",
            TapState::CaptureDR => "CAPTURE-DR",
            TapState::ShiftDR => "SHIFT-DR",
            TapState::Exit1DR => "EXIT1-DR",
            TapState::PauseDR => "PAUSE-DR",
            TapState::Exit2DR => "EXIT2-DR",
            TapState::UpdateDR => "UPDATE-DR",
            TapState::SelectIR => "SELECT-IR",
            TapState::CaptureIR => "CAPTURE-IR",
            TapState::ShiftIR => "SHIFT-IR",
            TapState::Exit1IR => "EXIT1-IR",
            TapState::PauseIR => "PAUSE-IR",
            TapState::Exit2IR => "EXIT2-IR",
            TapState::UpdateIR => "UPDATE-IR",
        })
    }
}

/// Which edges out of CAPTURE-DR/CAPTURE-IR lead into the shift states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphKind {
    /// The graph of the captured PDI sniffer design: CAPTURE-xR moves to
    /// SHIFT-xR on TMS=1 and to EXIT1-xR on TMS=0. Holding TMS high from
    /// CAPTURE-xR therefore takes six edges to reach RESET, not five.
    Captured,

    /// IEEE 1149.1: CAPTURE-xR moves to SHIFT-xR on TMS=0 and to EXIT1-xR
    /// on TMS=1.
    Ieee1149,
}

/// The transition graph a [`Tap`] follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TapGraph {
    pub kind: GraphKind,

    /// Route SELECT-IR on TMS=0 to CAPTURE-DR instead of CAPTURE-IR, as the
    /// captured design does. With this set, no IR scan is ever observed and
    /// the instruction register keeps its reset value.
    pub select_ir_quirk: bool,
}

impl TapGraph {
    pub const CAPTURED: TapGraph = TapGraph {
        kind: GraphKind::Captured,
        select_ir_quirk: false,
    };

    pub const IEEE1149: TapGraph = TapGraph {
        kind: GraphKind::Ieee1149,
        select_ir_quirk: false,
    };
}

impl Default for TapGraph {
    fn default() -> Self {
        TapGraph::CAPTURED
    }
}

/// Decoded contents of the 4-bit instruction register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    IdCode,
    PdiCom,
    /// Any other instruction. Data register updates under it are ignored.
    Other(u8),
}

impl Instruction {
    pub const IDCODE: u8 = 0x3;
    pub const PDICOM: u8 = 0x7;

    pub fn from_bits(bits: u8) -> Instruction {
        match bits & 0xf {
            Self::IDCODE => Instruction::IdCode,
            Self::PDICOM => Instruction::PdiCom,
            other => Instruction::Other(other),
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Instruction::IdCode => Self::IDCODE,
            Instruction::PdiCom => Self::PDICOM,
            Instruction::Other(bits) => *bits,
        }
    }
}

/// Pin levels sampled on one rising bus clock edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub tms: bool,
    pub tdi: bool,
    pub tdo: bool,

    /// System reset line. Recorded but not used for decoding.
    pub srst: bool,
}

impl Sample {
    pub fn new(tms: bool, tdi: bool, tdo: bool) -> Self {
        Sample {
            tms,
            tdi,
            tdo,
            srst: false,
        }
    }
}

/// A completed data register update the processing side cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapEvent {
    IdCode(u32),
    PdiFrame(PdiFrame),
}

/// Bit offset of a PDI frame in the 32-bit data registers once a PDICOM
/// scan has been shifted in. Bits \[22:32) are taken and the top one dropped.
const PDI_FRAME_OFFSET: usize = 22;

/// Passive TAP controller model driven by bus samples.
#[derive(Debug, Clone)]
pub struct Tap {
    graph: TapGraph,
    state: TapState,
    instruction: u8,
    next_instruction: ShiftRegister<4>,
    data_in: ShiftRegister<32>,
    data_out: ShiftRegister<32>,
    idcode: u32,
    pdi: PdiFrame,
}

impl Tap {
    pub fn new(graph: TapGraph) -> Self {
        Tap {
            graph,
            state: TapState::Reset,
            instruction: Instruction::IDCODE,
            next_instruction: ShiftRegister::new(),
            data_in: ShiftRegister::new(),
            data_out: ShiftRegister::new(),
            idcode: 0,
            pdi: PdiFrame::default(),
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn instruction(&self) -> Instruction {
        Instruction::from_bits(self.instruction)
    }

    /// The last IDCODE committed.
    pub fn idcode(&self) -> u32 {
        self.idcode
    }

    /// The last PDI frame pair committed.
    pub fn pdi_frame(&self) -> PdiFrame {
        self.pdi
    }

    /// Advances by one bus clock edge.
    ///
    /// Register actions belong to the state the edge is sampled in: bits are
    /// shifted on every edge sampled in SHIFT-xR, including the one leaving
    /// it, and updates are committed on the edge leaving UPDATE-xR.
    pub fn clock(&mut self, sample: Sample) -> Option<TapEvent> {
        let mut event = None;

        match self.state {
            TapState::ShiftDR => {
                self.data_in.shift_in(sample.tdi);
                self.data_out.shift_in(sample.tdo);
            }
            TapState::UpdateDR => event = self.update_dr(),
            TapState::ShiftIR => {
                self.next_instruction.shift_in(sample.tdi);
            }
            TapState::UpdateIR => {
                self.instruction = self.next_instruction.value() as u8;
                log::trace!("instruction register updated to {:#x}", self.instruction);
            }
            _ => {}
        }

        let next = self.state.next(sample.tms, &self.graph);
        if self.graph.select_ir_quirk
            && self.state == TapState::SelectIR
            && next == TapState::CaptureDR
        {
            log::debug!("SELECT-IR -> CAPTURE-DR taken (select_ir_quirk)");
        }
        if next == TapState::Reset {
            self.instruction = Instruction::IDCODE;
        }
        self.state = next;

        event
    }

    fn update_dr(&mut self) -> Option<TapEvent> {
        match self.instruction() {
            Instruction::IdCode => {
                self.idcode = self.data_in.value();
                log::trace!("IDCODE updated to {:#010x}", self.idcode);
                Some(TapEvent::IdCode(self.idcode))
            }
            Instruction::PdiCom => {
                let frame = |reg: &ShiftRegister<32>| {
                    SerialFrame::from_bits(
                        reg.field(PDI_FRAME_OFFSET..PDI_FRAME_OFFSET + SerialFrame::BITS) as u16,
                    )
                };
                self.pdi = PdiFrame {
                    write: frame(&self.data_in),
                    read: frame(&self.data_out),
                };
                log::trace!(
                    "PDI frame updated: write {:#05x}, read {:#05x}",
                    self.pdi.write.bits(),
                    self.pdi.read.bits()
                );
                Some(TapEvent::PdiFrame(self.pdi))
            }
            Instruction::Other(_) => None,
        }
    }
}

impl Default for Tap {
    fn default() -> Self {
        Tap::new(TapGraph::default())
    }
}
