//! Domain layer for eye
//!
//! This crate contains the relay's wire grammar, identifiers and error
//! taxonomy. It has no dependencies on I/O, runtimes or transports.
//!
//! # Core Concepts
//!
//! - **Request ID**: a caller-chosen token (`[A-Za-z0-9_]{1,19}`) prefixed to
//!   an expression; its absence means fire-and-forget.
//! - **Routing key**: opaque tenant identity partitioning server state.
//! - **Reply**: `id:result` on success, `id!:error` on failure, anything else
//!   is broadcast-only text.

pub mod core;
pub mod protocol;
pub mod util;

// Re-export commonly used types
pub use core::{
    error::RelayError,
    routing_key::RoutingKey,
    timing::{IDLE_CHECK_INTERVAL, IDLE_TIMEOUT, REQUEST_TIMEOUT, RESTART_EXIT_DELAY},
};
pub use protocol::{
    bridge::{BridgeCommand, BridgeFrame},
    frame::{Reply, ReplyStatus, RequestId, Submission},
    local::{LocalRequest, LocalResponse},
};
