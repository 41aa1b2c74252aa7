use std::io::Write;

use anyhow::{Context, bail};
use devices::{Bus, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get { width: Width, address: u64 },
    Set { width: Width, address: u64, value: u64 },
    Map,
    Dump,
}

fn width_of(suffix: &str) -> Option<Width> {
    match suffix {
        "8" => Some(Width::Byte),
        "16" => Some(Width::HalfWord),
        "32" => Some(Width::Word),
        "64" => Some(Width::DoubleWord),
        _ => None,
    }
}

/// Parses `0x` prefixed hex or plain decimal, `_` separators allowed.
fn parse_number(text: &str) -> anyhow::Result<u64> {
    let digits = text.replace('_', "");
    let parsed = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse(),
    };

    parsed.with_context(|| format!("`{text}` is not a number"))
}

fn fits(value: u64, width: Width) -> bool {
    width == Width::DoubleWord || value >> width.bits() == 0
}

/// Turns the command line words into commands. Everything is checked before
/// anything touches the bus.
pub fn parse(words: &[String]) -> anyhow::Result<Vec<Command>> {
    let mut words = words.iter().map(String::as_str);
    let mut commands = Vec::new();

    while let Some(word) = words.next() {
        let command = if word == "map" {
            Command::Map
        } else if word == "dump" {
            Command::Dump
        } else if let Some(width) = word.strip_prefix("get").and_then(width_of) {
            let address = words.next().with_context(|| format!("{word}: missing address"))?;
            Command::Get {
                width,
                address: parse_number(address)?,
            }
        } else if let Some(width) = word.strip_prefix("set").and_then(width_of) {
            let address = words.next().with_context(|| format!("{word}: missing address"))?;
            let value = words.next().with_context(|| format!("{word}: missing value"))?;
            let value = parse_number(value)?;
            if !fits(value, width) {
                bail!("{word}: value 0x{value:x} does not fit in {width} bits");
            }
            Command::Set {
                width,
                address: parse_number(address)?,
                value,
            }
        } else {
            bail!("unknown command `{word}`");
        };

        commands.push(command);
    }

    Ok(commands)
}

#[allow(clippy::cast_possible_truncation)]
pub fn run(bus: &mut Bus, commands: &[Command], out: &mut dyn Write) -> anyhow::Result<()> {
    for command in commands {
        match *command {
            Command::Get { width, address } => {
                let value = match width {
                    Width::Byte => u64::from(bus.get8(address)),
                    Width::HalfWord => u64::from(bus.get16(address)),
                    Width::Word => u64::from(bus.get32(address)),
                    Width::DoubleWord => bus.get64(address),
                };
                let ident = bus.device_at(address, width).map_or("-", |d| d.ident());
                let digits = (width.bytes() * 2) as usize;

                writeln!(
                    out,
                    "{ident} {width}-bit [0x{address:08x}] = 0x{value:0digits$x}"
                )?;
            }
            Command::Set {
                width,
                address,
                value,
            } => match width {
                Width::Byte => bus.set8(address, value as u8),
                Width::HalfWord => bus.set16(address, value as u16),
                Width::Word => bus.set32(address, value as u32),
                Width::DoubleWord => bus.set64(address, value),
            },
            Command::Map => {
                for (i, device) in bus.devices().iter().enumerate() {
                    writeln!(
                        out,
                        "{i}: {} 0x{:08x} +0x{:x}",
                        device.ident(),
                        device.address_base(),
                        device.address_range()
                    )?;
                }
            }
            Command::Dump => bus.dump()?,
        }
    }

    Ok(())
}
