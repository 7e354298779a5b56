//! Fixed-width shift registers, bit-range extraction and parity.
//!
//! All JTAG scans shift least significant bit first: a sampled bit enters a
//! [`ShiftRegister`] at its most significant end and moves one position
//! toward bit 0 on every subsequent shift.

use std::fmt;
use std::ops::Range;

use bitvec::prelude::*;

/// Extracts `value[range]` as an unsigned integer, bit `range.start`
/// becoming bit 0 of the result.
pub fn field(value: u32, range: Range<usize>) -> u32 {
    value.view_bits::<Lsb0>()[range].load_le::<u32>()
}

/// Whether the XOR-reduction of all bits in `value` is zero.
pub fn has_even_parity(value: u32) -> bool {
    value.view_bits::<Lsb0>().count_ones() % 2 == 0
}

/// A `WIDTH`-bit shift register fed from its most significant end.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftRegister<const WIDTH: u32> {
    value: u32,
}

impl<const WIDTH: u32> ShiftRegister<WIDTH> {
    const MASK: u32 = u32::MAX >> (32 - WIDTH);

    pub fn new() -> Self {
        Self { value: 0 }
    }

    /// Shifts `bit` in at bit `WIDTH - 1`, returning the bit shifted out of
    /// bit 0.
    pub fn shift_in(&mut self, bit: bool) -> bool {
        let out = self.value & 1 != 0;
        self.value = ((self.value >> 1) | ((bit as u32) << (WIDTH - 1))) & Self::MASK;
        out
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// See [`field`].
    pub fn field(&self, range: Range<usize>) -> u32 {
        field(self.value, range)
    }
}

impl<const WIDTH: u32> fmt::Debug for ShiftRegister<WIDTH> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShiftRegister<{}>({:#0w$b})", WIDTH, self.value, w = WIDTH as usize + 2)
    }
}

/// A 9-bit PDI serial frame: data in bits\[7:0\], parity in bit 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialFrame(u16);

impl SerialFrame {
    pub const BITS: usize = 9;
    const MASK: u16 = 0x1ff;

    /// Builds a frame from raw bits; anything above bit 8 is dropped.
    pub fn from_bits(bits: u16) -> Self {
        SerialFrame(bits & Self::MASK)
    }

    /// Builds a frame around `data` with the parity bit that makes the
    /// whole frame even.
    pub fn with_parity(data: u8) -> Self {
        let parity = !has_even_parity(data.into()) as u16;
        SerialFrame((parity << 8) | data as u16)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn data(&self) -> u8 {
        self.0 as u8
    }

    pub fn has_even_parity(&self) -> bool {
        has_even_parity(self.0.into())
    }
}

/// The pair of serial frames captured by one PDICOM data register update:
/// what the host shifted in on TDI and what the target shifted out on TDO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PdiFrame {
    /// Host to target.
    pub write: SerialFrame,

    /// Target to host.
    pub read: SerialFrame,
}
