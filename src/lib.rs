//! # `jtag-pdi`
//!
//! A decoder for Atmel PDI (Program and Debug Interface) traffic tunneled
//! through a JTAG port, reconstructed from passively sampled JTAG pins.
//!
//! The decoding pipeline is split in two clock domains, mirroring a hardware
//! sniffer:
//!
//! - the bus domain, advanced once per sampled TCK edge, runs a passive
//!   [`Tap`] model that tracks the TAP controller and reports IDCODE and
//!   PDICOM data register updates;
//! - the processing domain, advanced by a fixed number of clocks per bus
//!   edge, runs the PDI [`Dissector`](pdi::Dissector) that validates parity
//!   and splits the byte stream into commands and transaction data.
//!
//! Values cross between the two only through single-slot
//! [`handoff`] mailboxes: if the bus domain updates a value before the
//! processing domain picked up the previous one, the older value is lost
//! and counted.
//!
//! The [`Decoder`] reads recorded samples (see [`sample`]) from any
//! [`Read`](std::io::Read) and yields [`Event`]s, or writes them as the
//! tagged byte stream described in [`frame`]:
//!
//! ```
//! use jtag_pdi::{Decoder, DecoderOptions};
//!
//! // or a std::fs::File, or anything else that implements std::io::Read
//! let samples: &[u8] = &[
//!     // ...
//! ];
//! let mut decoder = Decoder::new(samples, DecoderOptions::default());
//! for event in decoder.events() {
//!     // ...
//! }
//! ```
#[deny(rustdoc::broken_intra_doc_links)]
pub mod bits;
pub mod frame;
pub mod handoff;
mod iter;
pub mod pdi;
pub mod sample;
pub mod stimulus;
pub mod tap;

pub use frame::{Frame, FrameEmitter, FrameError, FrameReader, Tag};
pub use iter::Events;
pub use pdi::{Arguments, Command, Direction, Dissector, Opcode, PdiEvent};
pub use sample::MalformedSample;
pub use tap::{GraphKind, Instruction, Sample, Tap, TapGraph, TapState};

use std::collections::VecDeque;
use std::io::{Read, Write};

use bits::PdiFrame;
use handoff::{Publisher, Subscriber};
use tap::TapEvent;

/// Something the decoder observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// An IDCODE data register update.
    IdCode(u32),

    /// Output of the PDI dissector.
    Pdi(PdiEvent),
}

/// [`Decoder`] configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecoderOptions {
    /// Transition graph the TAP model follows.
    pub graph: TapGraph,

    /// Processing domain clocks run after every bus edge. Values below 1
    /// are treated as 1.
    pub ticks_per_edge: u32,

    /// Whether to keep reading after a (temporary) EOF condition. If set,
    /// [`next`](Iterator::next) on [`Events`] will never return `None`
    /// unless the EOF condition is eventually resolved.
    pub ignore_eof: bool,

    /// Emit a [`Tag::Error`] frame for each parity error in
    /// [`Decoder::write_frames`].
    pub emit_errors: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            graph: TapGraph::default(),
            ticks_per_edge: 4,
            ignore_eof: false,
            emit_errors: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DecoderErrorInt {
    #[error("Buffer failed to read from source: {0}")]
    Io(#[from] std::io::Error),
    #[error("EOF encountered")]
    Eof,
    #[error("Malformed sample: {0}")]
    MalformedSample(#[from] MalformedSample),
}

/// Set of errors that can occur during decode.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("A malformed sample was encountered: {0}")]
    MalformedSample(#[from] MalformedSample),
}

struct Buffer<R>
where
    R: Read,
{
    reader: R,
    buffer: VecDeque<u8>,
    offset: u64,
    ignore_eof: bool,
}

impl<R> Buffer<R>
where
    R: Read,
{
    pub fn new(reader: R, ignore_eof: bool) -> Buffer<R> {
        Buffer {
            reader,
            buffer: VecDeque::new(),
            offset: 0,
            ignore_eof,
        }
    }

    /// Tries to read up to 32 bytes from [Self::reader]. Continuously
    /// retries if [Self::ignore_eof] is set.
    fn buffer_some(&mut self) -> Result<(), DecoderErrorInt> {
        let mut buffer: [u8; 32] = [0; 32];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => {
                    if self.ignore_eof {
                        continue;
                    }
                    return Err(DecoderErrorInt::Eof);
                }
                Ok(n) => {
                    self.buffer.extend(&buffer[..n]);
                    return Ok(());
                }
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Pops and decodes a single sample. Tries to buffer first if the
    /// buffer is empty. A malformed sample is consumed.
    pub fn pop_sample(&mut self) -> Result<Sample, DecoderErrorInt> {
        let byte = loop {
            match self.buffer.pop_front() {
                None => self.buffer_some()?,
                Some(byte) => break byte,
            }
        };
        let offset = self.offset;
        self.offset += 1;

        Ok(sample::decode(byte, offset)?)
    }
}

/// JTAG-PDI sample stream decoder.
pub struct Decoder<R>
where
    R: Read,
{
    /// Intermediate buffer to store the sample stream read from the
    /// given [Read] instance.
    buffer: Buffer<R>,

    // bus domain
    tap: Tap,
    idcode_tx: Publisher<u32>,
    frame_tx: Publisher<PdiFrame>,

    // processing domain
    idcode_rx: Subscriber<u32>,
    frame_rx: Subscriber<PdiFrame>,
    dissector: Dissector,
    ticks_per_edge: u32,
    emit_errors: bool,

    /// Events produced but not yet returned.
    events: VecDeque<Event>,
}

impl<R> Decoder<R>
where
    R: Read,
{
    pub fn new(reader: R, options: DecoderOptions) -> Decoder<R> {
        let (idcode_tx, idcode_rx) = handoff::mailbox();
        let (frame_tx, frame_rx) = handoff::mailbox();

        Decoder {
            buffer: Buffer::new(reader, options.ignore_eof),
            tap: Tap::new(options.graph),
            idcode_tx,
            frame_tx,
            idcode_rx,
            frame_rx,
            dissector: Dissector::new(),
            ticks_per_edge: options.ticks_per_edge.max(1),
            emit_errors: options.emit_errors,
            events: VecDeque::new(),
        }
    }

    /// Returns a reference to the underlying [`Read`](Read).
    pub fn get_ref(&self) -> &R {
        &self.buffer.reader
    }

    /// Returns a mutable reference to the underlying [`Read`](Read).
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.buffer.reader
    }

    pub fn tap(&self) -> &Tap {
        &self.tap
    }

    pub fn dissector(&self) -> &Dissector {
        &self.dissector
    }

    /// Number of samples consumed so far, malformed ones included.
    pub fn samples_read(&self) -> u64 {
        self.buffer.offset
    }

    /// PDI frames overwritten in the handoff before the dissector could
    /// take them.
    pub fn dropped_frames(&self) -> u64 {
        self.frame_rx.dropped()
    }

    /// IDCODE updates overwritten in the handoff before they were reported.
    pub fn dropped_idcodes(&self) -> u64 {
        self.idcode_rx.dropped()
    }

    /// Returns an iterator over [`Event`]s.
    pub fn events(&mut self) -> Events<R> {
        Events::new(self)
    }

    /// Decodes the whole stream, writing every event as a tagged frame
    /// to `sink`. Malformed samples are logged and skipped. Returns the
    /// sink once the input is exhausted.
    pub fn write_frames<W: Write>(&mut self, sink: W) -> Result<W, DecoderError> {
        let mut emitter = FrameEmitter::new(sink, self.emit_errors);
        loop {
            match self.next_event() {
                Ok(event) => {
                    emitter.emit(&event)?;
                }
                Err(DecoderErrorInt::Eof) => break,
                Err(DecoderErrorInt::MalformedSample(m)) => log::warn!("skipping: {}", m),
                Err(DecoderErrorInt::Io(e)) => return Err(e.into()),
            }
        }
        emitter.flush()?;
        Ok(emitter.into_inner())
    }

    /// Returns the next [Event] in the stream.
    fn next_event(&mut self) -> Result<Event, DecoderErrorInt> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }

            match self.buffer.pop_sample() {
                Ok(sample) => self.edge(sample),
                Err(DecoderErrorInt::Eof) => {
                    self.drain();
                    if self.events.is_empty() {
                        return Err(DecoderErrorInt::Eof);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One bus clock edge, followed by the processing domain clocks that
    /// fit in it.
    fn edge(&mut self, sample: Sample) {
        match self.tap.clock(sample) {
            Some(TapEvent::IdCode(idcode)) => {
                self.idcode_tx.publish(idcode);
            }
            Some(TapEvent::PdiFrame(frame)) => {
                self.frame_tx.publish(frame);
            }
            None => {}
        }

        for _ in 0..self.ticks_per_edge {
            self.tick();
        }
    }

    /// One processing domain clock.
    fn tick(&mut self) {
        if let Some(delivery) = self.idcode_rx.poll() {
            if delivery.dropped > 0 {
                log::warn!("{} IDCODE update(s) overwritten", delivery.dropped);
            }
            self.events.push_back(Event::IdCode(delivery.value));
        }

        let frame = if self.dissector.is_idle() {
            self.frame_rx.poll().map(|delivery| {
                if delivery.dropped > 0 {
                    log::warn!("{} PDI frame(s) overwritten", delivery.dropped);
                }
                delivery.value
            })
        } else {
            None
        };

        if let Some(event) = self.dissector.clock(frame) {
            self.events.push_back(Event::Pdi(event));
        }
    }

    /// Clocks the processing domain until everything handed off so far
    /// has been dissected.
    fn drain(&mut self) {
        while self.idcode_rx.pending() || self.frame_rx.pending() || !self.dissector.is_idle() {
            self.tick();
        }
    }
}

#[cfg(test)]
mod decoder_buffer_utils {
    use super::*;

    #[test]
    fn buffer_pop_sample() {
        let bytes: &[u8] = &[0b0001, 0b0110, 0b1000_0000, 0b0010];
        let mut buffer = Buffer::new(bytes, false);

        assert_eq!(buffer.pop_sample().unwrap(), Sample::new(true, false, false));
        assert_eq!(buffer.pop_sample().unwrap(), Sample::new(false, true, true));
        assert!(matches!(
            buffer.pop_sample(),
            Err(DecoderErrorInt::MalformedSample(MalformedSample { offset: 2, .. }))
        ));
        assert_eq!(buffer.pop_sample().unwrap(), Sample::new(false, true, false));
        assert!(matches!(buffer.pop_sample(), Err(DecoderErrorInt::Eof)));
        assert_eq!(buffer.offset, 4);
    }

    #[test]
    fn buffer_spans_chunks() {
        let bytes = vec![0b0001u8; 100];
        let mut buffer = Buffer::new(bytes.as_slice(), false);
        for _ in 0..100 {
            assert!(buffer.pop_sample().unwrap().tms);
        }
        assert!(matches!(buffer.pop_sample(), Err(DecoderErrorInt::Eof)));
    }

    #[test]
    fn slow_processing_domain_drops_frames() {
        let empty: &[u8] = &[];
        let mut decoder = Decoder::new(empty, DecoderOptions::default());
        decoder.frame_tx.publish(PdiFrame::default());
        decoder.frame_tx.publish(PdiFrame::default());
        decoder.drain();
        assert_eq!(decoder.dropped_frames(), 1);
        assert_eq!(decoder.events.len(), 1);
    }

    #[test]
    fn unpolled_idcodes_are_dropped() {
        let empty: &[u8] = &[];
        let mut decoder = Decoder::new(empty, DecoderOptions::default());
        decoder.idcode_tx.publish(1);
        decoder.idcode_tx.publish(2);
        decoder.drain();
        assert_eq!(decoder.dropped_idcodes(), 1);
        assert_eq!(decoder.events.pop_front(), Some(Event::IdCode(2)));
    }
}
