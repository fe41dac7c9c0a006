//! Relay error taxonomy

use thiserror::Error;

/// Errors a relay caller can observe.
///
/// Every variant crosses the relay boundary as a payload (`ERR:`, `id!:`,
/// `{"error": ...}`), so the type is `Clone` and carries only strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("No browser connected")]
    NoBridgeConnected,

    #[error("timeout waiting for browser response")]
    Timeout,

    #[error("request id '{0}' is already pending")]
    DuplicateId(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("version mismatch (daemon {expected}, caller {actual})")]
    VersionMismatch { expected: String, actual: String },

    #[error("not connected")]
    NotConnected,

    #[error("request superseded by a newer request with the same id")]
    Superseded,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RelayError {
    /// Build a transport error from anything displayable.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        RelayError::Transport(err.to_string())
    }

    /// Whether the error means the upstream link is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            RelayError::Transport(_) | RelayError::NotConnected | RelayError::NoBridgeConnected
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}
