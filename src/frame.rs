//! Tagged output byte stream.
//!
//! | Tag    | Meaning         | Payload            |
//! |--------|-----------------|--------------------|
//! | `0x10` | IDCODE captured | 4 bytes, MSB first |
//! | `0x11` | PDI byte        | 1 byte             |
//! | `0x1F` | Error           | none               |
//!
//! Every PDI byte, command header or transaction data, carries its own tag.

use std::io::{self, Read, Write};

use crate::pdi::PdiEvent;
use crate::Event;

/// Header byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Tag {
    IdCode = 0x10,
    Pdi = 0x11,
    Error = 0x1f,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Tag> {
        match byte {
            0x10 => Some(Tag::IdCode),
            0x11 => Some(Tag::Pdi),
            0x1f => Some(Tag::Error),
            _ => None,
        }
    }

    /// Number of payload bytes following the tag.
    pub fn payload_len(self) -> usize {
        match self {
            Tag::IdCode => 4,
            Tag::Pdi => 1,
            Tag::Error => 0,
        }
    }
}

/// One frame of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Frame {
    IdCode(u32),
    Pdi(u8),
    Error,
}

impl Frame {
    /// The frame an [`Event`] is emitted as. Parity errors only produce
    /// a frame if `emit_errors` is set.
    pub fn from_event(event: &Event, emit_errors: bool) -> Option<Frame> {
        match event {
            Event::IdCode(idcode) => Some(Frame::IdCode(*idcode)),
            Event::Pdi(PdiEvent::Command(command)) => Some(Frame::Pdi(command.byte)),
            Event::Pdi(PdiEvent::Data { byte, .. }) => Some(Frame::Pdi(*byte)),
            Event::Pdi(PdiEvent::ParityError { .. }) if emit_errors => Some(Frame::Error),
            Event::Pdi(PdiEvent::ParityError { .. }) => None,
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            Frame::IdCode(_) => Tag::IdCode,
            Frame::Pdi(_) => Tag::Pdi,
            Frame::Error => Tag::Error,
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        match self {
            Frame::IdCode(idcode) => buf.extend_from_slice(&idcode.to_be_bytes()),
            Frame::Pdi(byte) => buf.push(*byte),
            Frame::Error => {}
        }
    }
}

/// Writes [`Event`]s to a sink as tagged frames.
///
/// Each frame is handed to the sink with a single blocking `write_all`;
/// sink errors are returned as is.
pub struct FrameEmitter<W>
where
    W: Write,
{
    sink: W,
    emit_errors: bool,
    buf: Vec<u8>,
}

impl<W> FrameEmitter<W>
where
    W: Write,
{
    pub fn new(sink: W, emit_errors: bool) -> Self {
        FrameEmitter {
            sink,
            emit_errors,
            buf: Vec::with_capacity(5),
        }
    }

    /// Emits the frame for `event`, returning whether one was written.
    pub fn emit(&mut self, event: &Event) -> io::Result<bool> {
        let frame = match Frame::from_event(event, self.emit_errors) {
            Some(frame) => frame,
            None => return Ok(false),
        };

        self.buf.clear();
        frame.encode(&mut self.buf);
        self.sink.write_all(&self.buf)?;
        Ok(true)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Errors reading a tagged frame stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("{tag:?} frame truncated, {missing} payload byte(s) missing")]
    Truncated { tag: Tag, missing: usize },
}

/// Iterator parsing a tagged frame stream back into [`Frame`]s.
pub struct FrameReader<R>
where
    R: Read,
{
    reader: R,
}

impl<R> FrameReader<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        FrameReader { reader }
    }

    /// Fills `buf`, returning how many bytes were read before EOF.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut tag = [0u8; 1];
        if self.fill(&mut tag)? == 0 {
            return Ok(None);
        }
        let tag = Tag::from_byte(tag[0]).ok_or(FrameError::UnknownTag(tag[0]))?;

        let mut payload = [0u8; 4];
        let payload = &mut payload[..tag.payload_len()];
        let filled = self.fill(payload)?;
        if filled < payload.len() {
            return Err(FrameError::Truncated {
                tag,
                missing: payload.len() - filled,
            });
        }

        Ok(Some(match tag {
            Tag::IdCode => Frame::IdCode(u32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
            Tag::Pdi => Frame::Pdi(payload[0]),
            Tag::Error => Frame::Error,
        }))
    }
}

impl<R> Iterator for FrameReader<R>
where
    R: Read,
{
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
