//! Application layer for eye
//!
//! This crate contains the relay machinery (correlation table, upstream
//! connection manager, per-user hub, content bridge), the use cases built on top of it, and
//! the port definitions infrastructure adapters implement. It depends only
//! on the domain layer.

pub mod content;
pub mod correlation;
pub mod hub;
pub mod ports;
pub mod upstream;
pub mod use_cases;

// Re-export commonly used types
pub use content::{ContentBridge, ContentBridgeRegistry, ExtensionHandle};
pub use correlation::{CorrelationTable, Delivery, Waiter};
pub use hub::{HubRegistry, PrimaryHandle, SubscriberHandle, UserHub};
pub use ports::{
    identity::IdentityVerifier,
    transport::{Connector, FrameSink, FrameSource, Transport, TransportError},
};
pub use upstream::{InboundHandler, UpstreamManager, await_ready};
pub use use_cases::direct::{DirectClient, InboundEvent};
pub use use_cases::multiplex::{ExitReason, Multiplexer};
pub use use_cases::tool_call::{ToolCallUseCase, ToolRequest, bridge_command, tool_catalog};
