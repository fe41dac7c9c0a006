//! WebSocket adapter for the upstream transport port

mod connector;

pub use connector::WebSocketConnector;
