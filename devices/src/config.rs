//! Device map files.
//!
//! A map lists the devices to register, in scan order:
//!
//! ```json
//! {
//!   "warnings": 1,
//!   "devices": [
//!     { "kind": "ram", "base": 0, "size": 65536 },
//!     { "kind": "memcard", "image": "card.img", "blocks": 64 },
//!     { "kind": "console" }
//!   ]
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::device::Device;
use crate::hardware::memcard::{self, CardImage, ImageError};
use crate::hardware::{Console, Memcard, Ram, StorageTooLarge};

pub const DEFAULT_RAM_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read device map {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid device map: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("device {index} ({kind}) claims no address")]
    EmptyClaim { index: usize, kind: &'static str },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    TooLarge(#[from] StorageTooLarge),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceConfig {
    Ram {
        #[serde(default)]
        base: u64,
        size: usize,
    },
    Console {
        #[serde(default)]
        base: u64,
        #[serde(default = "full_range")]
        range: u64,
    },
    Memcard {
        #[serde(default = "memcard_base")]
        base: u64,
        #[serde(default)]
        image: Option<PathBuf>,
        #[serde(default = "memcard_blocks")]
        blocks: usize,
    },
}

const fn full_range() -> u64 {
    u64::MAX
}

const fn memcard_base() -> u64 {
    memcard::DEFAULT_BASE
}

const fn memcard_blocks() -> usize {
    memcard::DEFAULT_BLOCKS
}

const fn default_warnings() -> i32 {
    1
}

impl DeviceConfig {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ram { .. } => "ram",
            Self::Console { .. } => "console",
            Self::Memcard { .. } => "memcard",
        }
    }

    /// Instantiates the device. Memory card images are opened here.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Image`] when a memory card image can't be read, or
    /// [`ConfigError::TooLarge`] when the device storage can't be allocated.
    pub fn build(&self) -> Result<Box<dyn Device>, ConfigError> {
        let device: Box<dyn Device> = match self {
            Self::Ram { base, size } => Box::new(Ram::new(*base, *size)?),
            Self::Console { base, range } => Box::new(Console::new().with_claim(*base, *range)),
            Self::Memcard {
                base,
                image,
                blocks,
            } => {
                let image = match image {
                    Some(path) => CardImage::open_or_blank(path, *blocks)?,
                    None => CardImage::blank(*blocks)?,
                };
                Box::new(Memcard::new(*base, image))
            }
        };

        Ok(device)
    }

    const fn is_empty(&self) -> bool {
        match self {
            Self::Ram { size, .. } => *size == 0,
            Self::Console { range, .. } => *range == 0,
            Self::Memcard { blocks, .. } => *blocks == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMap {
    #[serde(default = "default_warnings")]
    pub warnings: i32,
    pub devices: Vec<DeviceConfig>,
}

impl Default for DeviceMap {
    /// RAM at the bottom, the memory card at its usual place, and a console
    /// catching every access nothing else claimed.
    fn default() -> Self {
        Self {
            warnings: default_warnings(),
            devices: vec![
                DeviceConfig::Ram {
                    base: 0,
                    size: DEFAULT_RAM_SIZE,
                },
                DeviceConfig::Memcard {
                    base: memcard::DEFAULT_BASE,
                    image: None,
                    blocks: memcard::DEFAULT_BLOCKS,
                },
                DeviceConfig::Console {
                    base: 0,
                    range: u64::MAX,
                },
            ],
        }
    }
}

impl DeviceMap {
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&text)
    }

    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed JSON or unknown device kinds.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Registers every device of the map on `bus`, in map order, and applies
    /// the warnings level. Overlapping claims are allowed but logged.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyClaim`] for a zero sized device, or any error of
    /// [`DeviceConfig::build`]. The bus is left untouched in every case.
    pub fn install(&self, bus: &mut Bus) -> Result<(), ConfigError> {
        let mut devices = Vec::with_capacity(self.devices.len());
        for (index, config) in self.devices.iter().enumerate() {
            if config.is_empty() {
                return Err(ConfigError::EmptyClaim {
                    index,
                    kind: config.kind(),
                });
            }
            devices.push(config.build()?);
        }

        let offset = bus.len();
        for device in devices {
            bus.add_device(device);
        }
        bus.set_warnings(self.warnings);

        for (a, b) in contested_overlaps(bus, offset) {
            tracing::warn!(
                "device {} ({}) overlaps device {} ({}), the first one wins",
                a,
                bus.devices()[a].ident(),
                b,
                bus.devices()[b].ident()
            );
        }

        Ok(())
    }

    /// A fresh bus printing to the standard output, populated from the map.
    ///
    /// # Errors
    ///
    /// See [`DeviceMap::install`].
    pub fn build(&self) -> Result<Bus, ConfigError> {
        let mut bus = Bus::new();
        self.install(&mut bus)?;
        Ok(bus)
    }
}

/// Claims the whole address space, so it only sees what earlier devices left.
fn is_catch_all(device: &dyn Device) -> bool {
    device.address_base() == 0 && device.address_range() == u64::MAX
}

/// Overlaps involving a device registered at or after `first_new`, except a
/// catch-all shadowed by the devices before it.
fn contested_overlaps(bus: &Bus, first_new: usize) -> Vec<(usize, usize)> {
    bus.overlaps()
        .into_iter()
        .filter(|&(_, b)| b >= first_new && !is_catch_all(bus.devices()[b].as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::diagnostics::{Capture, Diagnostics};

    fn capture_bus() -> (Bus, Capture) {
        let capture = Capture::new();
        (
            Bus::with_diagnostics(Diagnostics::with_sink(capture.clone())),
            capture,
        )
    }

    #[test]
    fn parses_every_kind() {
        let map = DeviceMap::from_json(
            r#"{
                "warnings": 0,
                "devices": [
                    { "kind": "ram", "base": 4096, "size": 256 },
                    { "kind": "memcard", "image": "card.img" },
                    { "kind": "console", "base": 16, "range": 1 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            map,
            DeviceMap {
                warnings: 0,
                devices: vec![
                    DeviceConfig::Ram {
                        base: 4096,
                        size: 256
                    },
                    DeviceConfig::Memcard {
                        base: 0xF000_0000,
                        image: Some(PathBuf::from("card.img")),
                        blocks: 64
                    },
                    DeviceConfig::Console { base: 16, range: 1 },
                ],
            }
        );
    }

    #[test]
    fn console_defaults_to_everything() {
        let map = DeviceMap::from_json(r#"{ "devices": [ { "kind": "console" } ] }"#).unwrap();

        assert_eq!(map.warnings, 1);
        assert_eq!(
            map.devices,
            vec![DeviceConfig::Console {
                base: 0,
                range: u64::MAX
            }]
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = DeviceMap::from_json(r#"{ "devices": [ { "kind": "uart" } ] }"#).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn install_keeps_map_order() {
        let (mut bus, capture) = capture_bus();

        DeviceMap::default().install(&mut bus).unwrap();

        assert_eq!(
            bus.devices().iter().map(|d| d.ident()).collect::<Vec<_>>(),
            vec!["RAM", "MEMCARD", "CON"]
        );
        assert_eq!(bus.warnings(), 1);

        bus.set32(0x10, 0x55AA_55AA);
        assert_eq!(bus.get32(0x10), 0x55AA_55AA);
        assert_eq!(bus.get32(0xF000_0214), 0);
        assert_eq!(capture.contents(), "");
    }

    #[test]
    fn empty_claim_is_rejected() {
        let (mut bus, _) = capture_bus();
        let map = DeviceMap {
            warnings: 1,
            devices: vec![
                DeviceConfig::Ram { base: 0, size: 16 },
                DeviceConfig::Ram { base: 16, size: 0 },
            ],
        };

        let err = map.install(&mut bus).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::EmptyClaim {
                index: 1,
                kind: "ram"
            }
        ));
        assert!(bus.is_empty());
    }

    #[test]
    fn oversized_devices_are_rejected() {
        let card = DeviceMap::from_json(
            r#"{ "devices": [ { "kind": "memcard", "blocks": 36028797018963968 } ] }"#,
        )
        .unwrap();
        let ram = DeviceMap {
            warnings: 1,
            devices: vec![DeviceConfig::Ram {
                base: 0,
                size: usize::MAX,
            }],
        };

        assert!(matches!(card.build(), Err(ConfigError::TooLarge(_))));
        assert!(matches!(ram.build(), Err(ConfigError::TooLarge(_))));
    }

    #[test]
    fn default_map_has_no_contested_overlaps() {
        let (mut bus, _) = capture_bus();

        DeviceMap::default().install(&mut bus).unwrap();

        assert_eq!(bus.overlaps(), vec![(0, 2), (1, 2)]);
        assert_eq!(contested_overlaps(&bus, 0), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn shadowed_devices_are_contested() {
        let (mut bus, _) = capture_bus();
        let map = DeviceMap {
            warnings: 1,
            devices: vec![
                DeviceConfig::Ram {
                    base: 0,
                    size: 0x100,
                },
                DeviceConfig::Console {
                    base: 0x80,
                    range: 0x10,
                },
                DeviceConfig::Console {
                    base: 0,
                    range: u64::MAX,
                },
            ],
        };

        map.install(&mut bus).unwrap();

        assert_eq!(contested_overlaps(&bus, 0), vec![(0, 1)]);
        assert_eq!(contested_overlaps(&bus, 2), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let image = dir.path().join("card.img");
        let map = DeviceMap {
            warnings: 0,
            devices: vec![DeviceConfig::Memcard {
                base: 0x4000_0000,
                image: Some(image.clone()),
                blocks: 2,
            }],
        };
        fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();

        let loaded = DeviceMap::load(&path).unwrap();
        assert_eq!(loaded, map);

        let (mut bus, _) = capture_bus();
        loaded.install(&mut bus).unwrap();
        assert_eq!(bus.warnings(), 0);

        bus.set32(0x4000_0200, 1);
        bus.set32(0x4000_0210, memcard::CONTROL_WRITE_COMMAND);
        bus.sync().unwrap();

        assert_eq!(fs::read(&image).unwrap().len(), 2 * memcard::BLOCK_SIZE);
    }

    #[test]
    fn missing_map_file() {
        let dir = tempfile::tempdir().unwrap();

        let err = DeviceMap::load(dir.path().join("absent.json")).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
