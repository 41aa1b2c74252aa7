use std::io::{self, Write};

use crate::device::{Device, Fault, Width};
use crate::diagnostics::{Access, AccessError, Diagnostic, Diagnostics};

/// The whole address space: every registered device plus the unmapped holes.
///
/// Devices are scanned in registration order and the first one whose
/// `match_address` accepts the access gets it, so on overlapping claims the
/// earliest registered device wins. An access is never split across devices.
#[derive(Default)]
pub struct Bus {
    devices: Vec<Box<dyn Device>>,
    diagnostics: Diagnostics,
}

impl Bus {
    /// An empty bus printing its warnings on the standard output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            devices: Vec::new(),
            diagnostics,
        }
    }

    /// Appends a device to the scan order. The bus owns it from now on.
    pub fn add_device(&mut self, device: Box<dyn Device>) {
        tracing::debug!(
            "device {} registered at 0x{:08x}, range 0x{:x}",
            device.ident(),
            device.address_base(),
            device.address_range()
        );
        self.devices.push(device);
    }

    /// Warnings level, 0 means silent. Fallback values do not depend on it.
    pub const fn set_warnings(&mut self, level: i32) {
        self.diagnostics.set_level(level);
    }

    #[must_use]
    pub const fn warnings(&self) -> i32 {
        self.diagnostics.level()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered devices, in scan order.
    #[must_use]
    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    /// The device that would serve an access, if any.
    #[must_use]
    pub fn device_at(&self, address: u64, width: Width) -> Option<&dyn Device> {
        self.devices
            .iter()
            .find(|d| d.match_address(address, width))
            .map(|d| &**d)
    }

    fn device_at_mut(&mut self, address: u64, width: Width) -> Option<&mut Box<dyn Device>> {
        self.devices
            .iter_mut()
            .find(|d| d.match_address(address, width))
    }

    /// Index pairs of registered devices whose `[base, base + range)` intersect.
    /// The bus itself never complains about them: the lower index always wins.
    #[must_use]
    pub fn overlaps(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();

        for (i, a) in self.devices.iter().enumerate() {
            for (j, b) in self.devices.iter().enumerate().skip(i + 1) {
                if claims_intersect(a.as_ref(), b.as_ref()) {
                    pairs.push((i, j));
                }
            }
        }

        pairs
    }

    fn try_read<T>(
        &self,
        address: u64,
        width: Width,
        read: impl FnOnce(&dyn Device) -> Result<T, Fault>,
    ) -> Result<T, AccessError> {
        let device = self
            .device_at(address, width)
            .ok_or(AccessError::Unmapped)?;

        tracing::trace!("{width}-bit read 0x{address:08x} -> {}", device.ident());

        Ok(read(device)?)
    }

    fn try_write(
        &mut self,
        address: u64,
        width: Width,
        write: impl FnOnce(&mut dyn Device) -> Result<(), Fault>,
    ) -> Result<(), AccessError> {
        let device = self
            .device_at_mut(address, width)
            .ok_or(AccessError::Unmapped)?;

        tracing::trace!("{width}-bit write 0x{address:08x} -> {}", device.ident());

        Ok(write(&mut **device)?)
    }

    /// Unmapped reads float high (all ones). A device that can't answer yields zero.
    fn read_or_fallback<T: Default>(
        &self,
        address: u64,
        width: Width,
        unmapped: T,
        read: impl FnOnce(&dyn Device) -> Result<T, Fault>,
    ) -> T {
        match self.try_read(address, width, read) {
            Ok(value) => value,
            Err(error) => {
                self.report(width, address, Access::Read, &error);
                match error {
                    AccessError::Unmapped => unmapped,
                    AccessError::Device(_) => T::default(),
                }
            }
        }
    }

    fn write_or_report(
        &mut self,
        address: u64,
        width: Width,
        value: u64,
        write: impl FnOnce(&mut dyn Device) -> Result<(), Fault>,
    ) {
        if let Err(error) = self.try_write(address, width, write) {
            self.report(width, address, Access::Write(value), &error);
        }
    }

    fn report(&self, width: Width, address: u64, access: Access, error: &AccessError) {
        self.diagnostics.report(&Diagnostic {
            width,
            address,
            access,
            error,
        });
    }

    /// # Errors
    ///
    /// [`AccessError::Unmapped`] when no device claims the byte, or the
    /// device's own [`Fault`].
    pub fn try_get8(&self, address: u64) -> Result<u8, AccessError> {
        self.try_read(address, Width::Byte, |d| d.get8(address))
    }

    /// # Errors
    ///
    /// See [`Bus::try_get8`].
    pub fn try_get16(&self, address: u64) -> Result<u16, AccessError> {
        self.try_read(address, Width::HalfWord, |d| d.get16(address))
    }

    /// # Errors
    ///
    /// See [`Bus::try_get8`].
    pub fn try_get32(&self, address: u64) -> Result<u32, AccessError> {
        self.try_read(address, Width::Word, |d| d.get32(address))
    }

    /// # Errors
    ///
    /// See [`Bus::try_get8`].
    pub fn try_get64(&self, address: u64) -> Result<u64, AccessError> {
        self.try_read(address, Width::DoubleWord, |d| d.get64(address))
    }

    /// # Errors
    ///
    /// [`AccessError::Unmapped`] when no device claims the byte, or the
    /// device's own [`Fault`]. Either way nothing was written.
    pub fn try_set8(&mut self, address: u64, value: u8) -> Result<(), AccessError> {
        self.try_write(address, Width::Byte, |d| d.set8(address, value))
    }

    /// # Errors
    ///
    /// See [`Bus::try_set8`].
    pub fn try_set16(&mut self, address: u64, value: u16) -> Result<(), AccessError> {
        self.try_write(address, Width::HalfWord, |d| d.set16(address, value))
    }

    /// # Errors
    ///
    /// See [`Bus::try_set8`].
    pub fn try_set32(&mut self, address: u64, value: u32) -> Result<(), AccessError> {
        self.try_write(address, Width::Word, |d| d.set32(address, value))
    }

    /// # Errors
    ///
    /// See [`Bus::try_set8`].
    pub fn try_set64(&mut self, address: u64, value: u64) -> Result<(), AccessError> {
        self.try_write(address, Width::DoubleWord, |d| d.set64(address, value))
    }

    #[must_use]
    pub fn get8(&self, address: u64) -> u8 {
        self.read_or_fallback(address, Width::Byte, u8::MAX, |d| d.get8(address))
    }

    #[must_use]
    pub fn get16(&self, address: u64) -> u16 {
        self.read_or_fallback(address, Width::HalfWord, u16::MAX, |d| {
            d.get16(address)
        })
    }

    #[must_use]
    pub fn get32(&self, address: u64) -> u32 {
        self.read_or_fallback(address, Width::Word, u32::MAX, |d| d.get32(address))
    }

    #[must_use]
    pub fn get64(&self, address: u64) -> u64 {
        self.read_or_fallback(address, Width::DoubleWord, u64::MAX, |d| {
            d.get64(address)
        })
    }

    pub fn set8(&mut self, address: u64, value: u8) {
        self.write_or_report(address, Width::Byte, value.into(), |d| {
            d.set8(address, value)
        });
    }

    pub fn set16(&mut self, address: u64, value: u16) {
        self.write_or_report(address, Width::HalfWord, value.into(), |d| {
            d.set16(address, value)
        });
    }

    pub fn set32(&mut self, address: u64, value: u32) {
        self.write_or_report(address, Width::Word, value.into(), |d| {
            d.set32(address, value)
        });
    }

    pub fn set64(&mut self, address: u64, value: u64) {
        self.write_or_report(address, Width::DoubleWord, value, |d| {
            d.set64(address, value)
        });
    }

    /// Prints every device, in scan order, to the diagnostics sink.
    ///
    /// # Errors
    ///
    /// Returns any error raised while writing to the sink.
    pub fn dump(&self) -> io::Result<()> {
        let mut out = self.diagnostics.writer();

        for (i, device) in self.devices.iter().enumerate() {
            writeln!(
                out,
                "DEVICE {i}: {} at 0x{:08x}, range 0x{:x}",
                device.ident(),
                device.address_base(),
                device.address_range()
            )?;
            device.dump(&mut **out)?;
        }

        out.flush()
    }

    /// Persists the backing storage of every device.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a device; later devices are still synced.
    pub fn sync(&mut self) -> io::Result<()> {
        let mut first_error = None;

        for device in &mut self.devices {
            if let Err(e) = device.sync() {
                tracing::error!("unable to sync {}: {e}", device.ident());
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn claims_intersect(a: &dyn Device, b: &dyn Device) -> bool {
    let a_start = u128::from(a.address_base());
    let a_end = a_start + u128::from(a.address_range());
    let b_start = u128::from(b.address_base());
    let b_end = b_start + u128::from(b.address_range());

    a_start < a_end && b_start < b_end && a_start < b_end && b_start < a_end
}
