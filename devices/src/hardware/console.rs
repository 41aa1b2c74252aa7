use std::io::{self, Write};

use crate::device::{Device, Fault};

/// Write-only character output. Every byte stored with `set8` is printed.
pub struct Console {
    base: u64,
    range: u64,
    out: Box<dyn Write>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// A console on the standard output claiming the whole address space.
    #[must_use]
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    #[must_use]
    pub fn with_output(out: impl Write + 'static) -> Self {
        Self {
            base: 0,
            range: u64::MAX,
            out: Box::new(out),
        }
    }

    #[must_use]
    pub const fn with_claim(mut self, base: u64, range: u64) -> Self {
        self.base = base;
        self.range = range;
        self
    }
}

impl Device for Console {
    fn address_base(&self) -> u64 {
        self.base
    }

    fn address_range(&self) -> u64 {
        self.range
    }

    fn ident(&self) -> &str {
        "CON"
    }

    fn io_set8(&mut self, _address: u64, value: u8) -> Result<(), Fault> {
        // A host side output failure never faults the guest store.
        if let Err(e) = self.out.write_all(&[value]).and_then(|()| self.out.flush()) {
            tracing::error!("console output failed: {e}");
        }

        Ok(())
    }
}
