use super::{Decoder, DecoderError, DecoderErrorInt, Event};

use std::io::Read;

/// Iterator that yield [`Event`](Event)s.
///
/// A malformed sample yields an `Err` and is skipped; iteration can
/// continue past it.
pub struct Events<'a, R>
where
    R: Read,
{
    decoder: &'a mut Decoder<R>,
}

impl<'a, R> Events<'a, R>
where
    R: Read,
{
    pub(super) fn new(decoder: &'a mut Decoder<R>) -> Self {
        Self { decoder }
    }
}

impl<'a, R> Iterator for Events<'a, R>
where
    R: Read,
{
    type Item = Result<Event, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.decoder.next_event();

        match event {
            Err(DecoderErrorInt::Eof) => None,
            Err(DecoderErrorInt::Io(io)) => Some(Err(DecoderError::Io(io))),
            Err(DecoderErrorInt::MalformedSample(m)) => Some(Err(DecoderError::MalformedSample(m))),
            Ok(event) => Some(Ok(event)),
        }
    }
}
