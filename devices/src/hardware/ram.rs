use std::io::{self, Write};

use crate::bitwise::Bits;
use crate::device::{Device, Fault};
use crate::hardware::{StorageTooLarge, zeroed};

/// Plain little-endian memory, readable and writable at every width.
pub struct Ram {
    base: u64,
    memory: Vec<u8>,
}

impl Ram {
    /// # Errors
    ///
    /// [`StorageTooLarge`] when `size` bytes can't be allocated.
    pub fn new(base: u64, size: usize) -> Result<Self, StorageTooLarge> {
        Ok(Self {
            base,
            memory: zeroed(size as u128)?,
        })
    }

    fn span(&self, address: u64, len: u8) -> Result<std::ops::Range<usize>, Fault> {
        let start = address
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(Fault::WrongAddress)?;
        let end = start
            .checked_add(usize::from(len))
            .filter(|end| *end <= self.memory.len())
            .ok_or(Fault::WrongAddress)?;

        Ok(start..end)
    }

    fn cells(&self, address: u64, len: u8) -> Result<&[u8], Fault> {
        let span = self.span(address, len)?;
        Ok(&self.memory[span])
    }

    fn cells_mut(&mut self, address: u64, len: u8) -> Result<&mut [u8], Fault> {
        let span = self.span(address, len)?;
        Ok(&mut self.memory[span])
    }

    fn read<T: Bits>(&self, address: u64) -> Result<T, Fault> {
        let mut value = 0_u64;
        for (i, byte) in self.cells(address, T::bytes())?.iter().enumerate() {
            value.set_byte(i as u8, *byte);
        }

        Ok(T::truncate(value))
    }

    fn write<T: Bits>(&mut self, address: u64, value: T) -> Result<(), Fault> {
        for (i, cell) in self.cells_mut(address, T::bytes())?.iter_mut().enumerate() {
            *cell = value.get_byte(i as u8);
        }

        Ok(())
    }
}

impl Device for Ram {
    fn address_base(&self) -> u64 {
        self.base
    }

    fn address_range(&self) -> u64 {
        self.memory.len() as u64
    }

    fn ident(&self) -> &str {
        "RAM"
    }

    fn io_get8(&self, address: u64) -> Result<u8, Fault> {
        self.read(address)
    }

    fn io_get16(&self, address: u64) -> Result<u16, Fault> {
        self.read(address)
    }

    fn io_get32(&self, address: u64) -> Result<u32, Fault> {
        self.read(address)
    }

    fn io_get64(&self, address: u64) -> Result<u64, Fault> {
        self.read(address)
    }

    fn io_set8(&mut self, address: u64, value: u8) -> Result<(), Fault> {
        self.write(address, value)
    }

    fn io_set16(&mut self, address: u64, value: u16) -> Result<(), Fault> {
        self.write(address, value)
    }

    fn io_set32(&mut self, address: u64, value: u32) -> Result<(), Fault> {
        self.write(address, value)
    }

    fn io_set64(&mut self, address: u64, value: u64) -> Result<(), Fault> {
        self.write(address, value)
    }

    fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "RAM: {} bytes at 0x{:08x}",
            self.memory.len(),
            self.base
        )
    }
}
