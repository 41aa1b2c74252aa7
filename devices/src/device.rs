use std::fmt;
use std::io::{self, Write};

/// Size of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    HalfWord,
    Word,
    DoubleWord,
}

impl Width {
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Byte => 1,
            Self::HalfWord => 2,
            Self::Word => 4,
            Self::DoubleWord => 8,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::HalfWord => 16,
            Self::Word => 32,
            Self::DoubleWord => 64,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Why a device could not complete an access. None of these are fatal: the bus
/// reports them and carries on with a fallback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("address is outside the device claim")]
    WrongAddress,

    #[error("access width is not implemented by the device")]
    Unsupported,

    #[error("illegal value{}", reason_suffix(.reason))]
    IllegalValue { reason: Option<String> },
}

#[allow(clippy::ref_option)]
fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map_or_else(String::new, |r| format!(": {r}"))
}

/// Returns true when `[address, address + width)` sits inside `[base, base + range)`.
///
/// Computed on `u128` so that a claim reaching the top of the 64 bit space
/// (e.g. base 0, range `u64::MAX`) does not overflow.
#[must_use]
pub fn span_contains(base: u64, range: u64, address: u64, width: Width) -> bool {
    let start = u128::from(base);
    let end = start + u128::from(range);
    let address = u128::from(address);

    address >= start && address + u128::from(width.bytes()) <= end
}

/// A peripheral living on the [`Bus`](crate::bus::Bus).
///
/// Implementors supply their claim (`address_base`/`address_range`), an
/// identifier, and override the `io_*` hooks for the widths they support.
/// The public `get*`/`set*` methods check the claim first, so a hook is only
/// reached with an address the device matched.
pub trait Device {
    fn address_base(&self) -> u64;

    /// Length of the claim in bytes.
    fn address_range(&self) -> u64;

    /// Short label used in diagnostics and dumps.
    fn ident(&self) -> &str;

    /// Whether the whole access `[address, address + width)` belongs to this device.
    /// Override to claim only part of `[address_base, address_base + address_range)`.
    fn match_address(&self, address: u64, width: Width) -> bool {
        span_contains(self.address_base(), self.address_range(), address, width)
    }

    fn get8(&self, address: u64) -> Result<u8, Fault> {
        self.check_claim(address, Width::Byte)?;
        self.io_get8(address)
    }

    fn get16(&self, address: u64) -> Result<u16, Fault> {
        self.check_claim(address, Width::HalfWord)?;
        self.io_get16(address)
    }

    fn get32(&self, address: u64) -> Result<u32, Fault> {
        self.check_claim(address, Width::Word)?;
        self.io_get32(address)
    }

    fn get64(&self, address: u64) -> Result<u64, Fault> {
        self.check_claim(address, Width::DoubleWord)?;
        self.io_get64(address)
    }

    fn set8(&mut self, address: u64, value: u8) -> Result<(), Fault> {
        self.check_claim(address, Width::Byte)?;
        self.io_set8(address, value)
    }

    fn set16(&mut self, address: u64, value: u16) -> Result<(), Fault> {
        self.check_claim(address, Width::HalfWord)?;
        self.io_set16(address, value)
    }

    fn set32(&mut self, address: u64, value: u32) -> Result<(), Fault> {
        self.check_claim(address, Width::Word)?;
        self.io_set32(address, value)
    }

    fn set64(&mut self, address: u64, value: u64) -> Result<(), Fault> {
        self.check_claim(address, Width::DoubleWord)?;
        self.io_set64(address, value)
    }

    fn io_get8(&self, _address: u64) -> Result<u8, Fault> {
        Err(Fault::Unsupported)
    }

    fn io_get16(&self, _address: u64) -> Result<u16, Fault> {
        Err(Fault::Unsupported)
    }

    fn io_get32(&self, _address: u64) -> Result<u32, Fault> {
        Err(Fault::Unsupported)
    }

    fn io_get64(&self, _address: u64) -> Result<u64, Fault> {
        Err(Fault::Unsupported)
    }

    fn io_set8(&mut self, _address: u64, _value: u8) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    fn io_set16(&mut self, _address: u64, _value: u16) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    fn io_set32(&mut self, _address: u64, _value: u32) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    fn io_set64(&mut self, _address: u64, _value: u64) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    /// Prints the internal state of the device.
    ///
    /// # Errors
    ///
    /// Returns any error raised by `out`.
    fn dump(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Persists any backing storage owned by the device.
    ///
    /// # Errors
    ///
    /// Returns the I/O error hit while writing the backing storage.
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn check_claim(&self, address: u64, width: Width) -> Result<(), Fault> {
        if self.match_address(address, width) {
            Ok(())
        } else {
            Err(Fault::WrongAddress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Claims a range and implements nothing.
    struct Blank;

    impl Device for Blank {
        fn address_base(&self) -> u64 {
            0x1000
        }

        fn address_range(&self) -> u64 {
            0x100
        }

        fn ident(&self) -> &str {
            "BLANK"
        }
    }

    #[test]
    fn match_address_boundaries() {
        let dev = Blank;

        for width in [Width::Byte, Width::HalfWord, Width::Word, Width::DoubleWord] {
            let last = 0x1100 - width.bytes();

            assert!(!dev.match_address(0x0FFF, width), "{width}-bit below base");
            assert!(dev.match_address(0x1000, width), "{width}-bit at base");
            assert!(dev.match_address(last, width), "{width}-bit at last slot");
            assert!(!dev.match_address(last + 1, width), "{width}-bit straddling end");
            assert!(!dev.match_address(0x1100, width), "{width}-bit at end");
        }
    }

    #[test]
    fn span_does_not_overflow_at_the_top() {
        assert!(span_contains(0, u64::MAX, 0x1000, Width::Byte));
        assert!(span_contains(0, u64::MAX, u64::MAX - 8, Width::DoubleWord));
        assert!(!span_contains(0, u64::MAX, u64::MAX, Width::Byte));
        assert!(!span_contains(u64::MAX - 1, 1, u64::MAX - 1, Width::HalfWord));
        assert!(!span_contains(0x10, 0, 0x10, Width::Byte));
    }

    #[test]
    fn defaults_are_unsupported() {
        let mut dev = Blank;

        assert_eq!(dev.get8(0x1000), Err(Fault::Unsupported));
        assert_eq!(dev.get16(0x1000), Err(Fault::Unsupported));
        assert_eq!(dev.get32(0x1000), Err(Fault::Unsupported));
        assert_eq!(dev.get64(0x1000), Err(Fault::Unsupported));
        assert_eq!(dev.set8(0x1000, 1), Err(Fault::Unsupported));
        assert_eq!(dev.set64(0x1000, 1), Err(Fault::Unsupported));
    }

    #[test]
    fn wrong_address_is_distinct() {
        let mut dev = Blank;

        assert_eq!(dev.get8(0x2000), Err(Fault::WrongAddress));
        assert_eq!(dev.get32(0x10FE), Err(Fault::WrongAddress));
        assert_eq!(dev.set16(0x0FFF, 1), Err(Fault::WrongAddress));
    }

    #[test]
    fn dump_and_sync_default_to_noop() {
        let mut dev = Blank;
        let mut out = Vec::new();

        dev.dump(&mut out).unwrap();
        dev.sync().unwrap();

        assert!(out.is_empty());
    }

    #[test]
    fn fault_messages() {
        assert_eq!(
            Fault::IllegalValue {
                reason: Some("busy".to_string())
            }
            .to_string(),
            "illegal value: busy"
        );
        assert_eq!(
            Fault::IllegalValue { reason: None }.to_string(),
            "illegal value"
        );
    }
}
