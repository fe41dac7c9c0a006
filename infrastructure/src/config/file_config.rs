//! Raw configuration data types
//!
//! These structs mirror the on-disk formats exactly: the client's
//! `~/.algo/config.json` and the relay server's `eye-relay.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("no token found")]
    MissingToken,

    #[error("relay config has no tokens; nobody could connect")]
    NoTokens,
}

/// Client configuration as found in `config.json` or `EYE_*` variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileClientConfig {
    pub token: Option<String>,
    pub server: Option<String>,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRelayConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Session token -> routing key (user name)
    pub tokens: HashMap<String, String>,
}

impl Default for FileRelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            tokens: HashMap::new(),
        }
    }
}

impl FileRelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.is_empty() {
            return Err(ConfigError::NoTokens);
        }
        Ok(())
    }
}
