//! MCP stdio bridge
//!
//! Newline-delimited JSON-RPC on stdin/stdout exposing a single `eye` tool
//! that evaluates an expression through a [`DirectClient`].
//!
//! [`DirectClient`]: eye_application::use_cases::direct::DirectClient

pub mod protocol;
mod server;

pub use server::McpServer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("stdio error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
