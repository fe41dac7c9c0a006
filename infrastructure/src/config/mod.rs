//! Configuration loading for eye
//!
//! The client reads `~/.algo/config.json`, `EYE_TOKEN` / `EYE_SERVER` and
//! the plain `~/.algo/token` / `~/.algo/server` files. The relay server
//! reads `eye-relay.toml` (or `--config <path>`) and `EYE_RELAY_*`.

mod file_config;
mod loader;

pub use file_config::{ConfigError, FileClientConfig, FileRelayConfig};
pub use loader::{ClientSettings, ConfigLoader, DEFAULT_SERVER, normalize_server};
