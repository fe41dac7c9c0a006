//! File logging for the detached daemon
//!
//! A daemon started with null stdio has nowhere to print, so its tracing
//! output goes to `<cache>/eye/daemon.log` through a non-blocking writer.
//! Keep the returned guard alive for the life of the process; dropping it
//! flushes and stops the background writer.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

pub const DAEMON_LOG_FILE: &str = "daemon.log";

/// `<cache>/eye`, falling back to the temp directory.
pub fn log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("eye")
}

/// Non-blocking writer appending to `dir/daemon.log`.
pub fn daemon_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, DAEMON_LOG_FILE);
    Ok(tracing_appender::non_blocking(appender))
}
