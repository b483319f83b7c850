//! Log subscriber setup

use crate::Result;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Level implied by the `--debug`/`--verbose` flags.
pub fn level_for(debug: bool, verbose: bool) -> Level {
    match (debug, verbose) {
        (true, true) => Level::TRACE,
        (true, false) => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Install the global subscriber: stderr output plus an optional plain-text
/// log file. `RUST_LOG` takes precedence over the flag-derived level.
pub fn init(debug: bool, verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(debug, verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pvetk={level}")));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(debug)
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(false, false), Level::INFO);
        assert_eq!(level_for(false, true), Level::INFO);
        assert_eq!(level_for(true, false), Level::DEBUG);
        assert_eq!(level_for(true, true), Level::TRACE);
    }
}
