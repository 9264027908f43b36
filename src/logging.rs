//! Logging setup.
//!
//! The interactive monitor owns the terminal, so it logs to
//! `<config dir>/vitaltone/vitaltone.log`. Batch runs log to stderr and keep
//! stdout for the exported event log. `RUST_LOG` overrides the default filter.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    File,
    Stderr,
}

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "info,vitaltone=debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log directory, `~/.config/vitaltone` on Linux.
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vitaltone"))
}

/// Install the global subscriber.
///
/// Returns the appender guard when logging to a file; hold it until exit
/// so buffered lines are flushed. Falls back to stderr if the log
/// directory cannot be created.
pub fn init(target: LogTarget, verbose: bool) -> Option<WorkerGuard> {
    if target == LogTarget::File {
        match open_file_writer() {
            Ok((writer, guard, path)) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
                    .with(filter(verbose))
                    .init();
                tracing::info!(log_file = ?path, "logging initialized");
                return Some(guard);
            }
            Err(e) => eprintln!("Failed to open log file: {e}, logging to stderr"),
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter(verbose))
        .init();
    None
}

fn open_file_writer() -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard, PathBuf)> {
    let dir = log_dir().ok_or_else(|| anyhow::anyhow!("no config directory on this platform"))?;
    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::never(&dir, "vitaltone.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard, dir.join("vitaltone.log")))
}
