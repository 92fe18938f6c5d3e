use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

/// The log file never records less than this, whatever the terminal shows.
const FILE_FLOOR: LevelFilter = LevelFilter::DEBUG;

fn terminal_level(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn file_level(verbosity: u8) -> LevelFilter {
    terminal_level(verbosity, false).max(FILE_FLOOR)
}

/// Installs the global subscriber: a compact terminal layer filtered by `-v`/`-q`, and
/// optionally a plain-text file layer that always keeps per-iteration detail.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let terminal = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(terminal_level(verbosity, quiet));

    let file = match log_file {
        Some(path) => {
            let handle = File::create(&path)?;
            Some(
                fmt::layer()
                    .with_writer(handle)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(file_level(verbosity)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(terminal)
        .with(file)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {e}")))
}
