//! Use cases
//!
//! Application-level operations that orchestrate the relay primitives.

pub mod direct;
pub mod multiplex;
pub mod tool_call;
