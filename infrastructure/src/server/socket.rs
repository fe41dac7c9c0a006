//! Server-side WebSocket plumbing
//!
//! Each accepted socket is split: a writer task owns the sink and drains an
//! unbounded queue, so hub fan-out never awaits a slow peer.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use eye_application::ports::transport::{FrameSink, TransportError};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Write handle to one accepted socket.
pub struct SocketSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl SocketSink {
    /// Queue a close frame; the writer task stops after sending it.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(frame.into()))
            .map_err(|_| TransportError::Closed)
    }
}

/// Split `socket` into a queued sink, the read stream, and the writer task.
pub fn split_socket(
    socket: WebSocket,
) -> (Arc<SocketSink>, SplitStream<WebSocket>, JoinHandle<()>) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    (Arc::new(SocketSink { tx }), ws_rx, writer)
}

/// Next text payload from the peer; `None` once the socket is done.
pub async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = stream.next().await {
        match message.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Binary(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}
