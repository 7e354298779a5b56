//! PDI command framing dissector.
//!
//! The [`Dissector`] runs in the processing domain and is advanced one clock
//! at a time. It is made of two coupled state machines: the frame handler,
//! which checks parity and walks a transaction byte by byte, and the count
//! machine, which turns a command byte into the number of bytes the host will
//! write and the target will answer with, including repeat counts programmed
//! by a preceding `REPEAT`.

use bitmatch::bitmatch;

use crate::bits::{self, PdiFrame, SerialFrame};

/// PDI instruction opcodes, encoded in the top nibble of a command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    /// Load from data space using direct addressing.
    Lds = 0,
    /// Load from data space using indirect addressing.
    Ld = 1,
    /// Store to data space using direct addressing.
    Sts = 2,
    /// Store to data space using indirect addressing.
    St = 3,
    /// Load from a control/status register.
    Ldcs = 4,
    /// Set the repeat counter for the next `LD`/`ST`.
    Repeat = 5,
    /// Store to a control/status register.
    Stcs = 6,
    /// Send the 8-byte activation key.
    Key = 7,
}

impl Opcode {
    /// Nibble value meaning "no transaction in progress".
    pub const IDLE: u8 = 0xf;

    /// `None` for [`IDLE`](Self::IDLE) and the reserved values 8..=14.
    pub fn from_nibble(nibble: u8) -> Option<Opcode> {
        Some(match nibble {
            0 => Opcode::Lds,
            1 => Opcode::Ld,
            2 => Opcode::Sts,
            3 => Opcode::St,
            4 => Opcode::Ldcs,
            5 => Opcode::Repeat,
            6 => Opcode::Stcs,
            7 => Opcode::Key,
            _ => return None,
        })
    }

}

/// The two size fields in the low nibble of a command byte, each already
/// converted from its 2-bit encoding to a byte count of 1 to 4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Arguments {
    /// Bits\[3:2\] + 1. Address width for `LDS`/`STS`.
    pub address_size: u8,

    /// Bits\[1:0\] + 1. Data width for loads and stores, repeat counter
    /// width for `REPEAT`.
    pub data_size: u8,
}

/// A decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Command {
    /// The raw byte as transmitted.
    pub byte: u8,

    /// `None` if the top nibble is not a known opcode.
    pub opcode: Option<Opcode>,

    pub args: Arguments,
}

impl Command {
    #[bitmatch]
    pub fn decode(byte: u8) -> Command {
        #[bitmatch]
        let "oooo_aadd" = byte;

        Command {
            byte,
            opcode: Opcode::from_nibble(o),
            args: Arguments {
                address_size: a + 1,
                data_size: d + 1,
            },
        }
    }
}

/// Which way a byte travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Host to target, shifted in on TDI.
    Write,

    /// Target to host, shifted out on TDO.
    Read,
}

/// Output of the [`Dissector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PdiEvent {
    /// A command byte opening a new transaction. Not transaction data.
    Command(Command),

    /// A transaction data byte.
    Data {
        byte: u8,
        opcode: Opcode,
        direction: Direction,
    },

    /// The frame carrying the expected direction had odd parity. Any
    /// transaction in progress was abandoned.
    ParityError {
        direction: Direction,
        frame: SerialFrame,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    CheckParity,
    HandleWrite,
    HandleRead,
    SendData,
    ParityError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountState {
    Idle,
    Decode,
    Size(Opcode),
    CaptureRepeat,
    UpdateRepeat,
}

/// PDI transaction tracker fed with the frame pairs of PDICOM scans.
#[derive(Debug, Clone)]
pub struct Dissector {
    frame_state: FrameState,
    count_state: CountState,

    /// Frame pair being handled.
    frame: PdiFrame,
    direction: Direction,

    /// `None` while no transaction is open.
    opcode: Option<Opcode>,
    command: Command,
    write_count: u64,
    read_count: u64,
    repeat_count: u32,
    repeat_data: u32,

    /// Set by the frame handler on a new command, cleared once the command
    /// byte has passed through SEND-DATA.
    update_counts: bool,

    /// Repeat counter byte handed to the count machine, valid for one clock.
    repeat_byte: Option<u8>,

    /// Data byte waiting in SEND-DATA.
    latched: Option<PdiEvent>,
}

impl Default for Dissector {
    fn default() -> Self {
        Dissector::new()
    }
}

impl Dissector {
    pub fn new() -> Self {
        Dissector {
            frame_state: FrameState::Idle,
            count_state: CountState::Idle,
            frame: PdiFrame::default(),
            direction: Direction::Write,
            opcode: None,
            command: Command::decode(0xff),
            write_count: 0,
            read_count: 0,
            repeat_count: 0,
            repeat_data: 0,
            update_counts: false,
            repeat_byte: None,
            latched: None,
        }
    }

    /// The open transaction's opcode, `None` if idle.
    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    /// Bytes the host still has to write in the open transaction.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Bytes the target still has to answer with in the open transaction.
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Repeat count waiting for the next `LD`/`ST`.
    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    /// Whether a new frame can be accepted on the next clock.
    pub fn is_idle(&self) -> bool {
        self.frame_state == FrameState::Idle
            && matches!(self.count_state, CountState::Idle | CountState::CaptureRepeat)
    }

    /// Advances both state machines by one processing clock. `frame` is
    /// only taken while [`is_idle`](Self::is_idle); otherwise it is ignored.
    pub fn clock(&mut self, frame: Option<PdiFrame>) -> Option<PdiEvent> {
        let frame = frame.filter(|_| self.is_idle());
        let event = self.clock_frame(frame);
        self.clock_counts();
        self.repeat_byte = None;
        event
    }

    /// Clocks until idle, collecting the events produced.
    pub fn settle(&mut self) -> Vec<PdiEvent> {
        let mut events = vec![];
        while !self.is_idle() {
            events.extend(self.clock(None));
        }
        events
    }

    /// Runs one frame pair through to completion.
    pub fn process(&mut self, frame: PdiFrame) -> Vec<PdiEvent> {
        let mut events = self.settle();
        events.extend(self.clock(Some(frame)));
        events.extend(self.settle());
        events
    }

    fn clock_frame(&mut self, frame: Option<PdiFrame>) -> Option<PdiEvent> {
        match self.frame_state {
            FrameState::Idle => {
                if let Some(frame) = frame {
                    self.frame = frame;
                    self.frame_state = FrameState::CheckParity;
                }
                None
            }
            FrameState::CheckParity => {
                let (direction, serial) = if self.opcode.is_none() || self.write_count != 0 {
                    (Direction::Write, self.frame.write)
                } else {
                    (Direction::Read, self.frame.read)
                };
                self.direction = direction;
                self.frame_state = match (direction, serial.has_even_parity()) {
                    (_, false) => FrameState::ParityError,
                    (Direction::Write, true) => FrameState::HandleWrite,
                    (Direction::Read, true) => FrameState::HandleRead,
                };
                None
            }
            FrameState::HandleWrite => {
                let byte = self.frame.write.data();
                self.frame_state = FrameState::SendData;

                match self.opcode {
                    None => {
                        let command = Command::decode(byte);
                        log::debug!("command {:#04x}: {:?}", byte, command.opcode);
                        self.command = command;
                        self.opcode = command.opcode;
                        self.update_counts = true;
                        Some(PdiEvent::Command(command))
                    }
                    Some(opcode) => {
                        self.write_count = self.write_count.saturating_sub(1);
                        if opcode == Opcode::Repeat {
                            self.repeat_byte = Some(byte);
                        }
                        self.latched = Some(PdiEvent::Data {
                            byte,
                            opcode,
                            direction: Direction::Write,
                        });
                        None
                    }
                }
            }
            FrameState::HandleRead => {
                self.read_count = self.read_count.saturating_sub(1);
                self.latched = self.opcode.map(|opcode| PdiEvent::Data {
                    byte: self.frame.read.data(),
                    opcode,
                    direction: Direction::Read,
                });
                self.frame_state = FrameState::SendData;
                None
            }
            FrameState::SendData => {
                self.frame_state = FrameState::Idle;
                if self.update_counts {
                    self.update_counts = false;
                    return None;
                }
                if self.write_count == 0 && self.read_count == 0 {
                    self.opcode = None;
                }
                self.latched.take()
            }
            FrameState::ParityError => {
                let frame = match self.direction {
                    Direction::Write => self.frame.write,
                    Direction::Read => self.frame.read,
                };
                log::warn!(
                    "parity error on {:?} frame {:#05x}, abandoning {:?}",
                    self.direction,
                    frame.bits(),
                    self.opcode
                );
                self.opcode = None;
                self.write_count = 0;
                self.read_count = 0;
                self.latched = None;
                self.frame_state = FrameState::Idle;
                Some(PdiEvent::ParityError {
                    direction: self.direction,
                    frame,
                })
            }
        }
    }

    fn clock_counts(&mut self) {
        match self.count_state {
            CountState::Idle => {
                if self.update_counts {
                    self.count_state = CountState::Decode;
                }
            }
            CountState::Decode => {
                self.count_state = match self.opcode {
                    Some(opcode) => CountState::Size(opcode),
                    None => {
                        let nibble = self.command.byte >> 4;
                        if nibble == Opcode::IDLE {
                            log::debug!("idle command {:#04x}", self.command.byte);
                        } else {
                            log::warn!(
                                "command {:#04x} has reserved opcode {:#x}",
                                self.command.byte,
                                nibble
                            );
                        }
                        CountState::Idle
                    }
                };
            }
            CountState::Size(opcode) => {
                let address_size = u64::from(self.command.args.address_size);
                let data_size = u64::from(self.command.args.data_size);
                let repeated = (u64::from(self.repeat_count) + 1) * data_size;

                let (write, read) = match opcode {
                    Opcode::Lds => (address_size, data_size),
                    Opcode::Ld => (0, repeated),
                    Opcode::Sts => (address_size + data_size, 0),
                    Opcode::St => (repeated, 0),
                    Opcode::Ldcs => (0, 1),
                    Opcode::Stcs => (1, 0),
                    Opcode::Key => (8, 0),
                    Opcode::Repeat => (data_size, 0),
                };
                if let Opcode::Ld | Opcode::St = opcode {
                    self.repeat_count = 0;
                }
                log::debug!("{:?}: {} bytes to write, {} to read", opcode, write, read);

                self.write_count = write;
                self.read_count = read;
                self.count_state = if opcode == Opcode::Repeat {
                    self.repeat_data = 0;
                    CountState::CaptureRepeat
                } else {
                    CountState::Idle
                };
            }
            CountState::CaptureRepeat => {
                if self.opcode != Some(Opcode::Repeat) {
                    // abandoned by a parity error
                    self.count_state = CountState::Idle;
                } else if let Some(byte) = self.repeat_byte {
                    self.repeat_data = (self.repeat_data << 8) | u32::from(byte);
                    if self.write_count == 0 {
                        self.count_state = CountState::UpdateRepeat;
                    }
                }
            }
            CountState::UpdateRepeat => {
                let width = usize::from(self.command.args.data_size);
                self.repeat_count = bits::field(self.repeat_data, 0..8 * width);
                log::debug!("repeat count set to {}", self.repeat_count);
                self.count_state = CountState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(byte: u8) -> PdiFrame {
        PdiFrame {
            write: SerialFrame::with_parity(byte),
            read: SerialFrame::default(),
        }
    }

    fn read(byte: u8) -> PdiFrame {
        PdiFrame {
            write: SerialFrame::default(),
            read: SerialFrame::with_parity(byte),
        }
    }

    fn data(events: &[PdiEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                PdiEvent::Data { byte, .. } => Some(*byte),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn command_decode() {
        let command = Command::decode(0x2d);
        assert_eq!(command.opcode, Some(Opcode::Sts));
        assert_eq!(
            command.args,
            Arguments {
                address_size: 4,
                data_size: 2
            }
        );
        assert_eq!(Command::decode(0xf0).opcode, None);
        assert_eq!(Command::decode(0x9c).opcode, None);
    }

    #[test]
    fn parity_gate() {
        for bits in 0..0x200u16 {
            let frame = SerialFrame::from_bits(bits);
            let mut dissector = Dissector::new();
            let events = dissector.process(PdiFrame {
                write: frame,
                read: SerialFrame::default(),
            });

            if frame.has_even_parity() {
                assert!(
                    matches!(events[..], [PdiEvent::Command(c)] if c.byte == frame.data()),
                    "{:#05x}: {:?}",
                    bits,
                    events
                );
            } else {
                assert_eq!(
                    events,
                    vec![PdiEvent::ParityError {
                        direction: Direction::Write,
                        frame
                    }]
                );
                assert_eq!(dissector.opcode(), None);
            }
        }
    }

    #[test]
    fn sts_transaction() {
        let mut dissector = Dissector::new();
        let events = dissector.process(write(0x20));
        assert_eq!(events, vec![PdiEvent::Command(Command::decode(0x20))]);
        assert_eq!(dissector.opcode(), Some(Opcode::Sts));
        assert_eq!(dissector.write_count(), 2);
        assert_eq!(dissector.read_count(), 0);

        let mut events = dissector.process(write(0x12));
        assert_eq!(dissector.opcode(), Some(Opcode::Sts));
        events.extend(dissector.process(write(0x34)));
        assert_eq!(dissector.opcode(), None);
        assert_eq!(
            events,
            vec![
                PdiEvent::Data {
                    byte: 0x12,
                    opcode: Opcode::Sts,
                    direction: Direction::Write
                },
                PdiEvent::Data {
                    byte: 0x34,
                    opcode: Opcode::Sts,
                    direction: Direction::Write
                },
            ]
        );
    }

    #[test]
    fn lds_switches_to_reads() {
        let mut dissector = Dissector::new();
        // address size 2, data size 4
        dissector.process(write(0x07));
        assert_eq!((dissector.write_count(), dissector.read_count()), (2, 4));

        let mut events = vec![];
        events.extend(dissector.process(write(0x00)));
        events.extend(dissector.process(write(0x20)));
        for byte in [0xde, 0xad, 0xbe, 0xef].iter() {
            // the write side of a read frame is not checked
            events.extend(dissector.process(PdiFrame {
                write: SerialFrame::from_bits(0x001),
                ..read(*byte)
            }));
        }

        assert_eq!(data(&events), vec![0x00, 0x20, 0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            events[2],
            PdiEvent::Data {
                direction: Direction::Read,
                opcode: Opcode::Lds,
                ..
            }
        ));
        assert_eq!(dissector.opcode(), None);
    }

    #[test]
    fn fixed_size_opcodes() {
        let cases = [
            (0x40, Opcode::Ldcs, 0, 1),
            (0x60, Opcode::Stcs, 1, 0),
            (0x70, Opcode::Key, 8, 0),
            (0x0f, Opcode::Lds, 4, 4),
            (0x2f, Opcode::Sts, 8, 0),
            (0x13, Opcode::Ld, 0, 4),
            (0x32, Opcode::St, 3, 0),
        ];

        for &(command, opcode, write_count, read_count) in cases.iter() {
            let mut dissector = Dissector::new();
            dissector.process(write(command));
            assert_eq!(dissector.opcode(), Some(opcode), "{:#04x}", command);
            assert_eq!(dissector.write_count(), write_count, "{:#04x}", command);
            assert_eq!(dissector.read_count(), read_count, "{:#04x}", command);
        }
    }

    #[test]
    fn repeat_feeds_next_load() {
        let mut dissector = Dissector::new();
        // REPEAT, 2-byte counter
        dissector.process(write(0x51));
        assert_eq!(dissector.write_count(), 2);
        let events = [dissector.process(write(0x01)), dissector.process(write(0x02))].concat();
        assert_eq!(data(&events), vec![0x01, 0x02]);
        assert_eq!(dissector.opcode(), None);
        assert_eq!(dissector.repeat_count(), 0x0102);

        // LD, 1-byte data
        dissector.process(write(0x10));
        assert_eq!(dissector.opcode(), Some(Opcode::Ld));
        assert_eq!(dissector.read_count(), 0x0103);
        assert_eq!(dissector.repeat_count(), 0);
    }

    #[test]
    fn repeat_widths() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let expected = [0x12, 0x1234, 0x12_3456, 0x1234_5678];

        for width in 0..4 {
            let mut dissector = Dissector::new();
            dissector.process(write(0x50 | width as u8));
            for byte in bytes[..=width].iter() {
                dissector.process(write(*byte));
            }
            assert_eq!(dissector.repeat_count(), expected[width]);
        }
    }

    #[test]
    fn repeat_multiplies_store() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x50));
        dissector.process(write(0x03));
        // ST, 2-byte data
        dissector.process(write(0x31));
        assert_eq!(dissector.write_count(), 8);

        let mut events = vec![];
        for byte in 0..8 {
            events.extend(dissector.process(write(byte)));
        }
        assert_eq!(data(&events), (0..8).collect::<Vec<u8>>());
        assert_eq!(dissector.opcode(), None);
    }

    #[test]
    fn full_width_repeat_does_not_overflow() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x53));
        for _ in 0..4 {
            dissector.process(write(0xff));
        }
        assert_eq!(dissector.repeat_count(), u32::MAX);
        dissector.process(write(0x13));
        assert_eq!(dissector.read_count(), (u64::from(u32::MAX) + 1) * 4);
    }

    #[test]
    fn parity_error_aborts_transaction() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x20));
        let mut events = dissector.process(write(0xaa));

        let bad = SerialFrame::from_bits(0x001);
        events.extend(dissector.process(PdiFrame {
            write: bad,
            read: SerialFrame::default(),
        }));
        assert_eq!(dissector.opcode(), None);
        assert_eq!(dissector.write_count(), 0);
        assert_eq!(dissector.read_count(), 0);

        // the next byte opens a new transaction
        events.extend(dissector.process(write(0x40)));

        assert_eq!(data(&events), vec![0xaa]);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, PdiEvent::ParityError { .. }))
                .count(),
            1
        );
        assert_eq!(events.last(), Some(&PdiEvent::Command(Command::decode(0x40))));
        assert_eq!(dissector.opcode(), Some(Opcode::Ldcs));
    }

    #[test]
    fn parity_error_clears_counts() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x2f));
        assert_eq!(dissector.write_count(), 8);

        dissector.process(PdiFrame {
            write: SerialFrame::from_bits(0x001),
            read: SerialFrame::default(),
        });
        assert_eq!(dissector.write_count(), 0);
        assert_eq!(dissector.read_count(), 0);

        // an idle command opens nothing
        let events = dissector.process(write(0xf0));
        assert_eq!(events, vec![PdiEvent::Command(Command::decode(0xf0))]);
        assert_eq!(dissector.opcode(), None);
        assert_eq!(dissector.write_count(), 0);
        assert_eq!(dissector.read_count(), 0);
        assert!(dissector.is_idle());
    }

    #[test]
    fn parity_error_on_read() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x40));
        let events = dissector.process(PdiFrame {
            write: SerialFrame::default(),
            read: SerialFrame::from_bits(0x080),
        });
        assert_eq!(
            events,
            vec![PdiEvent::ParityError {
                direction: Direction::Read,
                frame: SerialFrame::from_bits(0x080)
            }]
        );
        assert_eq!(dissector.opcode(), None);
    }

    #[test]
    fn parity_error_abandons_repeat() {
        let mut dissector = Dissector::new();
        dissector.process(write(0x51));
        dissector.process(write(0x01));
        dissector.process(PdiFrame {
            write: SerialFrame::from_bits(0x100),
            read: SerialFrame::default(),
        });
        assert!(dissector.is_idle());
        assert_eq!(dissector.repeat_count(), 0);

        dissector.process(write(0x10));
        assert_eq!(dissector.read_count(), 1);
    }

    #[test]
    fn reserved_opcode_stays_idle() {
        let mut dissector = Dissector::new();
        let events = dissector.process(write(0x9c));
        assert_eq!(events, vec![PdiEvent::Command(Command::decode(0x9c))]);
        assert_eq!(dissector.opcode(), None);
        assert!(dissector.is_idle());

        dissector.process(write(0x60));
        assert_eq!(dissector.opcode(), Some(Opcode::Stcs));
    }

    #[test]
    fn busy_dissector_ignores_frames() {
        let mut dissector = Dissector::new();
        assert_eq!(dissector.clock(Some(write(0x40))), None);
        assert!(!dissector.is_idle());
        // dropped: the frame handler is in CHECK-PARITY
        dissector.clock(Some(write(0x60)));
        let events = dissector.settle();
        assert_eq!(events, vec![PdiEvent::Command(Command::decode(0x40))]);
    }
}
