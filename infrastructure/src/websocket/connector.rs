//! [`Connector`] over `tokio-tungstenite`.

use async_trait::async_trait;
use eye_application::ports::transport::{
    Connector, FrameSink, FrameSource, Transport, TransportError,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials a fixed endpoint; the token rides in the query string.
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!("WebSocket: handshake status {}", response.status());

        let (sink, source) = stream.split();
        Ok(Transport::new(
            Arc::new(WsSink {
                inner: Mutex::new(sink),
            }),
            Box::new(WsSource { inner: source }),
        ))
    }

    fn describe(&self) -> String {
        // Never log the token.
        self.endpoint
            .split_once('?')
            .map(|(base, _)| base)
            .unwrap_or(&self.endpoint)
            .to_string()
    }
}

struct WsSink {
    inner: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.inner
            .lock()
            .await
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.inner.next().await {
            match message.map_err(|e| TransportError::Io(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Message::Close(frame) => {
                    debug!("WebSocket: close frame {:?}", frame);
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}
