//! Block oriented memory card controller.
//!
//! | Offset          | Register                                   |
//! |-----------------|--------------------------------------------|
//! | `0x000..=0x1FF` | data buffer, one block (512 bytes)         |
//! | `0x200`         | address: block number for the next command |
//! | `0x210`         | control: write or read command             |
//! | `0x214`         | status (read only)                         |
//!
//! Only 32-bit accesses are implemented. Commands complete synchronously,
//! so the busy bit of the status register never shows up set.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::bitwise::Bits;
use crate::device::{Device, Fault, Width};
use crate::hardware::{StorageTooLarge, zeroed};

pub const BLOCK_SIZE: usize = 512;

pub const DEFAULT_BASE: u64 = 0xF000_0000;
pub const DEFAULT_BLOCKS: usize = 64;

/// Span from the base that holds the buffer and every register.
pub const RANGE: u64 = 0x218;

const BUFFER_END: u64 = BLOCK_SIZE as u64;
const ADDRESS_REG: u64 = 0x200;
const CONTROL_REG: u64 = 0x210;
const STATUS_REG: u64 = 0x214;

pub const CONTROL_WRITE_COMMAND: u32 = 0x8000_0001;
pub const CONTROL_READ_COMMAND: u32 = 0x8000_0002;

pub const STATUS_ERROR_BIT: u8 = 0;
pub const STATUS_BUSY_BIT: u8 = 31;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unable to read memory card image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to write memory card image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    TooLarge(#[from] StorageTooLarge),
}

/// Storage behind the card: a run of 512-byte blocks, optionally tied to a file.
pub struct CardImage {
    data: Vec<u8>,
    path: Option<PathBuf>,
    dirty: bool,
}

impl CardImage {
    /// # Errors
    ///
    /// [`StorageTooLarge`] when `blocks` blocks can't be allocated.
    pub fn blank(blocks: usize) -> Result<Self, StorageTooLarge> {
        Ok(Self {
            data: zeroed(blocks as u128 * BLOCK_SIZE as u128)?,
            path: None,
            dirty: false,
        })
    }

    /// Loads an image file. A trailing partial block is padded with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Read`] when the file can't be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref().to_path_buf();
        let mut data = fs::read(&path).map_err(|source| ImageError::Read {
            path: path.clone(),
            source,
        })?;
        data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);

        tracing::debug!(
            "memory card image {} loaded, {} blocks",
            path.display(),
            data.len() / BLOCK_SIZE
        );

        Ok(Self {
            data,
            path: Some(path),
            dirty: false,
        })
    }

    /// Opens `path` if it exists, otherwise starts from a blank image of
    /// `blocks` blocks that is created on the first flush.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Read`] when an existing file can't be read, or
    /// [`ImageError::TooLarge`] when the blank image can't be allocated.
    pub fn open_or_blank(path: impl AsRef<Path>, blocks: usize) -> Result<Self, ImageError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::open(path);
        }

        Ok(Self {
            path: Some(path.to_path_buf()),
            dirty: true,
            ..Self::blank(blocks)?
        })
    }

    #[must_use]
    pub fn blocks(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    #[must_use]
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(BLOCK_SIZE)?;
        self.data.get(start..start.checked_add(BLOCK_SIZE)?)
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let start = index.checked_mul(BLOCK_SIZE)?;
        let block = self.data.get_mut(start..start.checked_add(BLOCK_SIZE)?)?;
        self.dirty = true;
        Some(block)
    }

    /// Writes the image back to its file, if it has one and it changed.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Write`] when the file can't be written.
    pub fn flush(&mut self) -> Result<(), ImageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        fs::write(path, &self.data).map_err(|source| ImageError::Write {
            path: path.clone(),
            source,
        })?;
        self.dirty = false;

        tracing::debug!("memory card image {} flushed", path.display());

        Ok(())
    }
}

pub struct Memcard {
    base: u64,
    buffer: [u8; BLOCK_SIZE],
    address: u32,
    control: u32,
    status: u32,
    image: CardImage,
}

impl Memcard {
    #[must_use]
    pub const fn new(base: u64, image: CardImage) -> Self {
        Self {
            base,
            buffer: [0; BLOCK_SIZE],
            address: 0,
            control: 0,
            status: 0,
            image,
        }
    }

    fn write_control(&mut self, value: u32) -> Result<(), Fault> {
        let block = self.address as usize;
        let done = match value {
            CONTROL_WRITE_COMMAND => {
                tracing::info!("memory card: write block {block}");
                self.image
                    .block_mut(block)
                    .map(|dst| dst.copy_from_slice(&self.buffer))
            }
            CONTROL_READ_COMMAND => {
                tracing::info!("memory card: read block {block}");
                self.image
                    .block(block)
                    .map(|src| self.buffer.copy_from_slice(src))
            }
            _ => {
                return Err(Fault::IllegalValue {
                    reason: Some(format!(
                        "memory card control accepts 0x{CONTROL_WRITE_COMMAND:08x} (write block) or 0x{CONTROL_READ_COMMAND:08x} (read block)"
                    )),
                });
            }
        };

        if done.is_none() {
            tracing::warn!(
                "memory card: block {block} is past the end of the image ({} blocks)",
                self.image.blocks()
            );
        }

        self.control = value;
        self.status.set_bit(STATUS_ERROR_BIT, done.is_none());
        self.status.set_bit(STATUS_BUSY_BIT, false);

        Ok(())
    }

    fn buffer_word(&self, offset: usize) -> u32 {
        let mut word = 0_u32;
        for (i, byte) in self.buffer[offset..offset + 4].iter().enumerate() {
            word.set_byte(i as u8, *byte);
        }
        word
    }
}

impl Device for Memcard {
    fn address_base(&self) -> u64 {
        self.base
    }

    fn address_range(&self) -> u64 {
        RANGE
    }

    fn ident(&self) -> &str {
        "MEMCARD"
    }

    /// Claims the buffer and the three registers, not the holes between them.
    /// Registers are only claimed at their own address.
    fn match_address(&self, address: u64, width: Width) -> bool {
        let Some(offset) = address.checked_sub(self.base) else {
            return false;
        };
        let Some(end) = offset.checked_add(width.bytes()) else {
            return false;
        };

        end <= BUFFER_END
            || (matches!(offset, ADDRESS_REG | CONTROL_REG | STATUS_REG) && width.bytes() <= 4)
    }

    fn io_get32(&self, address: u64) -> Result<u32, Fault> {
        match address.wrapping_sub(self.base) {
            // The low two address bits are ignored inside the buffer.
            offset @ 0..BUFFER_END => Ok(self.buffer_word((offset & !3) as usize)),
            ADDRESS_REG => Ok(self.address),
            CONTROL_REG => Ok(self.control),
            STATUS_REG => Ok(self.status),
            _ => Err(Fault::WrongAddress),
        }
    }

    fn io_set32(&mut self, address: u64, value: u32) -> Result<(), Fault> {
        match address.wrapping_sub(self.base) {
            offset @ 0..BUFFER_END => {
                let offset = (offset & !3) as usize;
                for (i, byte) in self.buffer[offset..offset + 4].iter_mut().enumerate() {
                    *byte = value.get_byte(i as u8);
                }
                Ok(())
            }
            ADDRESS_REG => {
                self.address = value;
                Ok(())
            }
            CONTROL_REG => self.write_control(value),
            STATUS_REG => Err(Fault::Unsupported),
            _ => Err(Fault::WrongAddress),
        }
    }

    fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "MEMCARD: address=0x{:08x} control=0x{:08x} status=0x{:08x} blocks={}",
            self.address,
            self.control,
            self.status,
            self.image.blocks()
        )
    }

    fn sync(&mut self) -> io::Result<()> {
        self.image.flush().map_err(io::Error::other)
    }
}
