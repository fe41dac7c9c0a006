//! Core domain concepts shared across the relay.
//!
//! - [`routing_key::RoutingKey`]: opaque tenant identifier
//! - [`error::RelayError`]: caller-visible relay errors
//! - [`timing`]: the fixed timeouts every component honours

pub mod error;
pub mod routing_key;
pub mod timing;
