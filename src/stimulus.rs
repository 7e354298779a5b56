//! Synthesizes bus sample sequences for JTAG scans.
//!
//! [`Stimulus`] walks its own TAP model through the requested scans and
//! records the sample driven on every edge. Useful for exercising the
//! decoder without a recording:
//!
//! ```
//! use jtag_pdi::stimulus::Stimulus;
//! use jtag_pdi::{Decoder, DecoderOptions, Event};
//!
//! let mut stimulus = Stimulus::new(Default::default());
//! stimulus.reset().scan_dr(0x1e95_703f, 0, 32).unwrap().idle(1).unwrap();
//!
//! let bytes = stimulus.to_bytes();
//! let mut decoder = Decoder::new(bytes.as_slice(), DecoderOptions::default());
//! let event = decoder.events().next().unwrap().unwrap();
//! assert_eq!(event, Event::IdCode(0x1e95_703f));
//! ```

use crate::bits::{PdiFrame, SerialFrame};
use crate::sample;
use crate::tap::{Sample, TapGraph, TapState};

/// The requested state cannot be reached under the configured graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{to} is unreachable from {from}")]
pub struct Unreachable {
    pub from: TapState,
    pub to: TapState,
}

/// Bits shifted per PDICOM scan: the 9-bit frame plus one trailing bit
/// that ends up in the discarded top register bit.
pub const PDI_SCAN_BITS: usize = SerialFrame::BITS + 1;

/// Bus sample sequence builder.
#[derive(Debug, Clone)]
pub struct Stimulus {
    graph: TapGraph,
    state: TapState,
    samples: Vec<Sample>,
}

impl Stimulus {
    /// Starts in RESET, the state a freshly created [`Tap`](crate::Tap)
    /// assumes.
    pub fn new(graph: TapGraph) -> Self {
        Stimulus {
            graph,
            state: TapState::Reset,
            samples: vec![],
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The samples in the recorded format of [`sample`](crate::sample).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.samples.iter().map(sample::encode).collect()
    }

    /// Records one edge.
    pub fn clock(&mut self, tms: bool, tdi: bool, tdo: bool) -> &mut Self {
        self.samples.push(Sample::new(tms, tdi, tdo));
        self.state = self.state.next(tms, &self.graph);
        self
    }

    /// At least five TMS=1 edges, continuing until RESET is reached. The
    /// captured graph needs a sixth edge out of CAPTURE-xR.
    pub fn reset(&mut self) -> &mut Self {
        for _ in 0..5 {
            self.clock(true, false, false);
        }
        while self.state != TapState::Reset {
            self.clock(true, false, false);
        }
        self
    }

    /// Walks to `target` by the shortest TMS sequence.
    pub fn goto(&mut self, target: TapState) -> Result<&mut Self, Unreachable> {
        let path = self.state.path_to(target, &self.graph).ok_or(Unreachable {
            from: self.state,
            to: target,
        })?;
        for tms in path {
            self.clock(tms, false, false);
        }
        Ok(self)
    }

    /// Stays in IDLE for `edges` edges.
    pub fn idle(&mut self, edges: usize) -> Result<&mut Self, Unreachable> {
        self.goto(TapState::Idle)?;
        for _ in 0..edges {
            self.clock(false, false, false);
        }
        Ok(self)
    }

    /// Shifts `bits` bits of `tdi`/`tdo`, least significant first, leaving
    /// SHIFT-xR on the last one. The caller is in SHIFT-xR.
    fn shift(&mut self, tdi: u64, tdo: u64, bits: usize) {
        for i in 0..bits {
            self.clock(i + 1 == bits, tdi >> i & 1 != 0, tdo >> i & 1 != 0);
        }
    }

    /// Loads `instruction` into the instruction register and returns to
    /// IDLE through UPDATE-IR.
    pub fn scan_ir(&mut self, instruction: u8) -> Result<&mut Self, Unreachable> {
        self.goto(TapState::ShiftIR)?;
        self.shift(instruction.into(), 0, 4);
        self.goto(TapState::UpdateIR)?;
        self.goto(TapState::Idle)
    }

    /// Shifts one data register scan and returns to IDLE through
    /// UPDATE-DR. `bits` is at most 64.
    pub fn scan_dr(&mut self, tdi: u64, tdo: u64, bits: usize) -> Result<&mut Self, Unreachable> {
        self.goto(TapState::ShiftDR)?;
        self.shift(tdi, tdo, bits.min(64));
        self.goto(TapState::UpdateDR)?;
        self.goto(TapState::Idle)
    }

    /// One PDICOM scan carrying raw frames. The PDICOM instruction must be
    /// loaded already.
    pub fn pdi_frame(&mut self, frame: PdiFrame) -> Result<&mut Self, Unreachable> {
        self.scan_dr(
            frame.write.bits().into(),
            frame.read.bits().into(),
            PDI_SCAN_BITS,
        )
    }

    /// A PDICOM scan of a host byte, with correct parity. The target side
    /// is left at zero.
    pub fn pdi_write(&mut self, byte: u8) -> Result<&mut Self, Unreachable> {
        self.pdi_frame(PdiFrame {
            write: SerialFrame::with_parity(byte),
            read: SerialFrame::default(),
        })
    }

    /// A PDICOM scan of a target byte, with correct parity. The host side
    /// is left at zero.
    pub fn pdi_read(&mut self, byte: u8) -> Result<&mut Self, Unreachable> {
        self.pdi_frame(PdiFrame {
            write: SerialFrame::default(),
            read: SerialFrame::with_parity(byte),
        })
    }
}
