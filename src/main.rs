mod command;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use devices::config::DeviceMap;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Peek and poke the memory mapped device bus of rvddt.
#[derive(Parser, Debug)]
#[command(name = "rvddt", version, about)]
struct Args {
    /// Device map (JSON). Defaults to 64 KiB of RAM at 0, a memory card at
    /// 0xF0000000 and a console catching everything else.
    #[arg(long, value_name = "FILE")]
    map: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Don't print bus warnings.
    #[arg(short, long)]
    quiet: bool,

    /// Commands run in order: get8|get16|get32|get64 ADDR,
    /// set8|set16|set32|set64 ADDR VALUE, map, dump.
    #[arg(value_name = "COMMAND")]
    commands: Vec<String>,
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("{} is not a file", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(args.log_file.as_deref())?;

    let commands = command::parse(&args.commands)?;

    let map = match &args.map {
        Some(path) => DeviceMap::load(path)
            .with_context(|| format!("loading device map {}", path.display()))?,
        None => DeviceMap::default(),
    };
    let mut bus = map.build().context("building the device bus")?;
    if args.quiet {
        bus.set_warnings(0);
    }
    tracing::info!("rvddt v{}: {} devices", env!("CARGO_PKG_VERSION"), bus.len());

    let result = command::run(&mut bus, &commands, &mut io::stdout());

    bus.sync().context("saving memory card images")?;

    result
}
