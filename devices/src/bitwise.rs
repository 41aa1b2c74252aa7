use std::mem::size_of;

/// Bit and byte helpers shared by the register files of the devices.
/// Indexes go from lsb to msb (right to left), bytes are numbered little-endian.
pub trait Bits: Copy + Into<u64> {
    /// Keeps the low `size_of::<Self>()` bytes of `value`.
    fn truncate(value: u64) -> Self;

    #[must_use]
    fn bytes() -> u8 {
        size_of::<Self>() as u8
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        debug_assert!(bit_idx < Self::bytes() * 8);
        let mask = 1_u64 << bit_idx;
        let bitwise = if value {
            (*self).into() | mask
        } else {
            (*self).into() & !mask
        };
        *self = Self::truncate(bitwise);
    }

    fn get_byte(self, byte_nth: u8) -> u8 {
        debug_assert!(byte_nth < Self::bytes());
        (self.into() >> (8 * u32::from(byte_nth))) as u8
    }

    fn set_byte(&mut self, byte_nth: u8, value: u8) {
        debug_assert!(byte_nth < Self::bytes());
        let shift = 8 * u32::from(byte_nth);
        let cleared = (*self).into() & !(0xFF_u64 << shift);
        *self = Self::truncate(cleared | (u64::from(value) << shift));
    }
}

impl Bits for u64 {
    fn truncate(value: u64) -> Self {
        value
    }
}

impl Bits for u32 {
    fn truncate(value: u64) -> Self {
        value as Self
    }
}

impl Bits for u16 {
    fn truncate(value: u64) -> Self {
        value as Self
    }
}

impl Bits for u8 {
    fn truncate(value: u64) -> Self {
        value as Self
    }
}
