//! In-memory upstream used by the adapter tests.

use async_trait::async_trait;
use eye_application::ports::transport::{
    Connector, FrameSink, FrameSource, Transport, TransportError,
};
use eye_domain::protocol::bridge::READY;
use std::sync::Arc;
use tokio::sync::mpsc;

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.0.send(frame).map_err(|_| TransportError::Closed)
    }
}

struct ChannelSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.0.recv().await)
    }
}

/// The browser side of one in-memory link.
pub struct FakeBrowser {
    inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<String>,
}

impl FakeBrowser {
    pub fn reply(&self, frame: &str) {
        let _ = self.outbox.send(frame.to_string());
    }

    pub async fn next(&mut self) -> String {
        self.inbox.recv().await.expect("client closed")
    }
}

/// Hands out links greeted with `:ready`.
pub struct FakeConnector {
    browsers: mpsc::UnboundedSender<FakeBrowser>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeBrowser>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { browsers: tx }), rx)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        let (to_browser, inbox) = mpsc::unbounded_channel();
        let (outbox, from_browser) = mpsc::unbounded_channel();
        let _ = outbox.send(READY.to_string());
        let _ = self.browsers.send(FakeBrowser { inbox, outbox });
        Ok(Transport::new(
            Arc::new(ChannelSink(to_browser)),
            Box::new(ChannelSource(from_browser)),
        ))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
