//! Infrastructure layer for eye
//!
//! This crate contains adapters that implement the ports defined in the
//! application layer: the WebSocket upstream connector, the axum relay
//! server, the unix-socket daemon, the MCP stdio bridge, configuration
//! loading and daemon file logging.

pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{ClientSettings, ConfigError, ConfigLoader, FileRelayConfig};
#[cfg(unix)]
pub use daemon::{DaemonClient, DaemonError, DaemonExit, DaemonStatus, KillOutcome, run_daemon};
pub use mcp::{McpError, McpServer};
pub use server::{RelayServer, ServerError, StaticTokenVerifier};
pub use websocket::WebSocketConnector;
