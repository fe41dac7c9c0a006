//! Duplex text transport port
//!
//! The relay never touches WebSockets or sockets directly. Adapters in the
//! infrastructure layer provide a [`Connector`] that yields a split
//! [`Transport`]: a shareable [`FrameSink`] for writing and an exclusively
//! owned [`FrameSource`] for the single read loop.

use async_trait::async_trait;
use eye_domain::RelayError;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by transport adapters
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        RelayError::transport(err)
    }
}

/// Write half of a text transport. Safe to share between tasks.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one text frame.
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// Read half of a text transport, owned by exactly one read loop.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame; `Ok(None)` on an orderly close.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// A freshly opened connection, split for single-reader / shared-writer use.
pub struct Transport {
    pub sink: Arc<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Transport {
    pub fn new(sink: Arc<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }
}

/// Opens transports to the remote evaluator.
///
/// Credentials travel inside the connection request (e.g. `?token=` on the
/// URI), so connecting is all an adapter has to do.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, TransportError>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}
