//! Text framing rules for every transport in the relay.
//!
//! - [`frame`]: `id:expression` requests and `id:result` / `id!:error` replies
//! - [`local`]: the daemon's line protocol (`VERSION:`, `EVAL:`, `OK:`, ...)
//! - [`bridge`]: server ↔ browser wrappers (`EYE_CMD:`, `MCP_CMD:`, ...)

pub mod bridge;
pub mod frame;
pub mod local;
