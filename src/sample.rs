//! Recorded bus sample format.
//!
//! One byte per rising bus clock edge:
//!
//! ``` text
//!  7   6   5   4   3    2   1   0
//! [ reserved (0)  |SRST|TDO|TDI|TMS]
//! ```

use bitmatch::bitmatch;

use crate::tap::Sample;

/// A recorded sample byte with reserved bits set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("malformed sample {byte:#04x} at offset {offset}: reserved bits {reserved:#x} set")]
pub struct MalformedSample {
    /// Position of the byte in the recording.
    pub offset: u64,
    pub byte: u8,
    pub reserved: u8,
}

/// Decodes one recorded sample byte. `offset` is only used for error
/// reporting.
#[bitmatch]
pub fn decode(byte: u8, offset: u64) -> Result<Sample, MalformedSample> {
    #[bitmatch]
    match byte {
        "0000_rodm" => Ok(Sample {
            tms: m != 0,
            tdi: d != 0,
            tdo: o != 0,
            srst: r != 0,
        }),
        "xxxx_????" => Err(MalformedSample {
            offset,
            byte,
            reserved: x,
        }),
    }
}

/// Encodes a sample into its recorded byte.
pub fn encode(sample: &Sample) -> u8 {
    (sample.tms as u8)
        | (sample.tdi as u8) << 1
        | (sample.tdo as u8) << 2
        | (sample.srst as u8) << 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_lines() {
        assert_eq!(decode(0b0001, 0), Ok(Sample::new(true, false, false)));
        assert_eq!(decode(0b0010, 0), Ok(Sample::new(false, true, false)));
        assert_eq!(decode(0b0100, 0), Ok(Sample::new(false, false, true)));
        assert_eq!(
            decode(0b1000, 0),
            Ok(Sample {
                srst: true,
                ..Sample::default()
            })
        );
    }

    #[test]
    fn reserved_bits() {
        assert_eq!(
            decode(0xa5, 17),
            Err(MalformedSample {
                offset: 17,
                byte: 0xa5,
                reserved: 0xa,
            })
        );
    }

    #[test]
    fn encode_matches_decode() {
        for byte in 0..16u8 {
            assert_eq!(decode(byte, 0).map(|s| encode(&s)), Ok(byte));
        }
    }
}
