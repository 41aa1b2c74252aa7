use std::cell::{RefCell, RefMut};
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::device::{Fault, Width};

/// Why the bus could not complete an access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("no device claims the address")]
    Unmapped,

    #[error(transparent)]
    Device(#[from] Fault),
}

/// Direction of an access; writes carry the value for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write(u64),
}

/// One diagnostic event, rendered as the line(s) printed to the sink.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostic<'a> {
    pub width: Width,
    pub address: u64,
    pub access: Access,
    pub error: &'a AccessError,
}

/// Diagnostic lines print the low 32 bits of addresses and values.
#[allow(clippy::cast_possible_truncation)]
const fn low32(value: u64) -> u32 {
    value as u32
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            width,
            address,
            access,
            error,
        } = *self;
        let address = low32(address);
        let access = match access {
            Access::Write(value) => Access::Write(u64::from(low32(value))),
            Access::Read => Access::Read,
        };

        match (error, access) {
            (AccessError::Unmapped, Access::Read) => write!(
                f,
                "WARNING: {width}-bit read from non-existent device at address: 0x{address:08x}"
            ),
            (AccessError::Unmapped, Access::Write(value)) => write!(
                f,
                "WARNING: {width}-bit write to non-existent device at address: 0x{address:08x} = 0x{value:08x}"
            ),
            (AccessError::Device(Fault::WrongAddress), Access::Read) => write!(
                f,
                "Error {width}-bit read from wrong address: 0x{address:08x}"
            ),
            (AccessError::Device(Fault::WrongAddress), Access::Write(value)) => write!(
                f,
                "Error {width}-bit write to wrong address: 0x{address:08x} = 0x{value:08x}"
            ),
            (AccessError::Device(Fault::Unsupported), Access::Read) => write!(
                f,
                "WARNING: {width}-bit read from non-implemented read mode by device at address: 0x{address:08x}"
            ),
            (AccessError::Device(Fault::Unsupported), Access::Write(value)) => write!(
                f,
                "WARNING: {width}-bit write to non-implemented by device at address: 0x{address:08x} = 0x{value:08x}"
            ),
            (AccessError::Device(Fault::IllegalValue { reason }), access) => {
                match access {
                    Access::Write(value) => write!(
                        f,
                        "WARNING: {width}-bit write to address 0x{address:08x} with illegal value 0x{value:08x}"
                    )?,
                    Access::Read => write!(
                        f,
                        "WARNING: {width}-bit read from address 0x{address:08x} refused by device"
                    )?,
                }
                match reason {
                    Some(reason) => write!(f, "\n{reason}"),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Where the bus prints its warnings, and whether it prints them at all.
pub struct Diagnostics {
    level: i32,
    sink: RefCell<Box<dyn Write>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Diagnostics {
    /// Prints to the standard output, warnings enabled.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_sink(io::stdout())
    }

    #[must_use]
    pub fn with_sink(sink: impl Write + 'static) -> Self {
        Self {
            level: 1,
            sink: RefCell::new(Box::new(sink)),
        }
    }

    pub const fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    #[must_use]
    pub const fn level(&self) -> i32 {
        self.level
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.level != 0
    }

    /// Prints one diagnostic, unless warnings are off.
    pub fn report(&self, diagnostic: &Diagnostic<'_>) {
        if !self.enabled() {
            return;
        }

        tracing::debug!(target: "rvddt::diagnostics", "{diagnostic}");

        let mut sink = self.sink.borrow_mut();
        if let Err(e) = writeln!(sink, "{diagnostic}").and_then(|()| sink.flush()) {
            tracing::error!("unable to print diagnostic: {e}");
        }
    }

    /// Direct access to the sink, used for dumps.
    pub fn writer(&self) -> RefMut<'_, Box<dyn Write>> {
        self.sink.borrow_mut()
    }
}

/// In-memory writer whose clones share one buffer.
/// Hand one clone to a bus or a device and read the output back from another.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn render(width: Width, address: u64, access: Access, error: &AccessError) -> String {
        Diagnostic {
            width,
            address,
            access,
            error,
        }
        .to_string()
    }

    #[test]
    fn unmapped_lines() {
        assert_eq!(
            render(Width::Word, 0x500, Access::Read, &AccessError::Unmapped),
            "WARNING: 32-bit read from non-existent device at address: 0x00000500"
        );
        assert_eq!(
            render(Width::Byte, 0x150, Access::Write(0x41), &AccessError::Unmapped),
            "WARNING: 8-bit write to non-existent device at address: 0x00000150 = 0x00000041"
        );
    }

    #[test]
    fn device_fault_lines() {
        assert_eq!(
            render(
                Width::HalfWord,
                0xF000_0000,
                Access::Read,
                &AccessError::Device(Fault::Unsupported)
            ),
            "WARNING: 16-bit read from non-implemented read mode by device at address: 0xf0000000"
        );
        assert_eq!(
            render(
                Width::DoubleWord,
                0x10,
                Access::Write(0xDEAD),
                &AccessError::Device(Fault::Unsupported)
            ),
            "WARNING: 64-bit write to non-implemented by device at address: 0x00000010 = 0x0000dead"
        );
        assert_eq!(
            render(
                Width::Byte,
                0x20,
                Access::Read,
                &AccessError::Device(Fault::WrongAddress)
            ),
            "Error 8-bit read from wrong address: 0x00000020"
        );
    }

    #[test]
    fn illegal_value_with_reason() {
        let error = AccessError::Device(Fault::IllegalValue {
            reason: Some("unknown command".to_string()),
        });

        assert_eq!(
            render(Width::Word, 0xF000_0210, Access::Write(7), &error),
            "WARNING: 32-bit write to address 0xf0000210 with illegal value 0x00000007\nunknown command"
        );
    }

    #[test]
    fn wide_addresses_and_values_keep_low_word() {
        assert_eq!(
            render(Width::Byte, 0x1_2345_6789, Access::Read, &AccessError::Unmapped),
            "WARNING: 8-bit read from non-existent device at address: 0x23456789"
        );
        assert_eq!(
            render(
                Width::DoubleWord,
                0x10,
                Access::Write(0x1122_3344_5566_7788),
                &AccessError::Unmapped
            ),
            "WARNING: 64-bit write to non-existent device at address: 0x00000010 = 0x55667788"
        );
    }

    #[test]
    fn refused_read_with_and_without_reason() {
        let bare = AccessError::Device(Fault::IllegalValue { reason: None });
        let explained = AccessError::Device(Fault::IllegalValue {
            reason: Some("locked".to_string()),
        });

        assert_eq!(
            render(Width::Word, 0x40, Access::Read, &bare),
            "WARNING: 32-bit read from address 0x00000040 refused by device"
        );
        assert_eq!(
            render(Width::Word, 0x40, Access::Read, &explained),
            "WARNING: 32-bit read from address 0x00000040 refused by device\nlocked"
        );
    }

    #[test]
    fn report_honours_level() {
        let capture = Capture::new();
        let mut diagnostics = Diagnostics::with_sink(capture.clone());
        let diagnostic = Diagnostic {
            width: Width::Word,
            address: 0x500,
            access: Access::Read,
            error: &AccessError::Unmapped,
        };

        diagnostics.report(&diagnostic);
        assert_eq!(capture.lines().len(), 1);

        diagnostics.set_level(0);
        diagnostics.report(&diagnostic);
        assert_eq!(capture.lines().len(), 1);
        assert_eq!(diagnostics.level(), 0);
    }
}
