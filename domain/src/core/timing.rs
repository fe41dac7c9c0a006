//! Fixed timing constants shared by every relay component.

use std::time::Duration;

/// How long any correlation point waits for a reply before evicting.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon exits after this long without local or upstream traffic.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Period of the daemon's idle check.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Delay between answering `RESTART` and exiting, so the reply can flush.
pub const RESTART_EXIT_DELAY: Duration = Duration::from_millis(100);
