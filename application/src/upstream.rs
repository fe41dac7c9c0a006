//! Upstream connection manager
//!
//! Owns the single long-lived link to the remote evaluator. Connecting
//! performs the `:ready` handshake, then hands the read half to a background
//! task that pushes every inbound frame to an [`InboundHandler`]. Sends go
//! through a shared sink so any number of tasks may write concurrently.
//!
//! Each successful connect bumps a generation counter; a read loop that dies
//! only clears the link if it still belongs to the current generation, so a
//! reconnect is never undone by the old loop's exit.

use crate::ports::transport::{Connector, FrameSink, FrameSource};
use async_trait::async_trait;
use eye_domain::protocol::bridge::READY;
use eye_domain::util::preview;
use eye_domain::{REQUEST_TIMEOUT, RelayError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives everything the upstream sends after the handshake.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_frame(&self, frame: String);

    /// Called once when the link the handler was attached to goes away.
    async fn on_disconnect(&self, reason: RelayError);
}

struct Link {
    generation: u64,
    sink: Arc<dyn FrameSink>,
    reader: JoinHandle<()>,
}

pub struct UpstreamManager {
    connector: Arc<dyn Connector>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    /// Serializes connect attempts.
    connect_lock: tokio::sync::Mutex<()>,
}

impl UpstreamManager {
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Open a link, wait for `:ready`, and start the read loop.
    ///
    /// Replaces any existing link; the old read loop is aborted without
    /// notifying its handler.
    pub async fn connect(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), RelayError> {
        let _guard = self.connect_lock.lock().await;
        self.connect_locked(handler).await
    }

    async fn connect_locked(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), RelayError> {
        debug!("Upstream: connecting to {}", self.connector.describe());
        let transport = self.connector.connect().await?;
        let mut source = transport.source;
        await_ready(source.as_mut()).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = tokio::spawn(read_loop(
            source,
            handler,
            Arc::downgrade(self),
            generation,
        ));

        let previous = self.lock().replace(Link {
            generation,
            sink: transport.sink,
            reader,
        });
        if let Some(previous) = previous {
            debug!("Upstream: replacing link generation {}", previous.generation);
            previous.reader.abort();
        }

        info!(
            "Upstream: connected to {} (generation {})",
            self.connector.describe(),
            generation
        );
        Ok(())
    }

    /// Drop the current link (if any) and connect afresh.
    pub async fn reconnect(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), RelayError> {
        self.connect(handler).await
    }

    /// Connect only if there is no live link.
    pub async fn ensure_connected(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), RelayError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.connect_locked(handler).await
    }

    /// Send one frame upstream.
    pub async fn send(&self, frame: String) -> Result<(), RelayError> {
        let sink = self
            .lock()
            .as_ref()
            .map(|link| Arc::clone(&link.sink))
            .ok_or(RelayError::NotConnected)?;
        debug!("Upstream: > {}", preview(&frame));
        sink.send(frame).await.map_err(RelayError::from)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Tear down the link without notifying the handler.
    pub fn disconnect(&self) {
        if let Some(link) = self.lock().take() {
            link.reader.abort();
            debug!("Upstream: disconnected generation {}", link.generation);
        }
    }

    fn mark_disconnected(&self, generation: u64) -> bool {
        let mut link = self.lock();
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            *link = None;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for UpstreamManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Block for the first frame and require it to be exactly `:ready`.
pub async fn await_ready(source: &mut dyn FrameSource) -> Result<(), RelayError> {
    let first = tokio::time::timeout(REQUEST_TIMEOUT, source.recv())
        .await
        .map_err(|_| RelayError::HandshakeFailed("no greeting from server".to_string()))??;

    match first {
        Some(frame) if frame == READY => Ok(()),
        Some(frame) => Err(RelayError::HandshakeFailed(format!(
            "expected {READY}, got: {frame}"
        ))),
        None => Err(RelayError::HandshakeFailed(
            "connection closed before greeting".to_string(),
        )),
    }
}

async fn read_loop(
    mut source: Box<dyn FrameSource>,
    handler: Arc<dyn InboundHandler>,
    manager: Weak<UpstreamManager>,
    generation: u64,
) {
    let reason = loop {
        match source.recv().await {
            Ok(Some(frame)) => {
                debug!("Upstream: < {}", preview(&frame));
                handler.on_frame(frame).await;
            }
            Ok(None) => break RelayError::transport("connection closed by server"),
            Err(e) => {
                warn!("Upstream: read error: {}", e);
                break RelayError::from(e);
            }
        }
    };

    let current = manager
        .upgrade()
        .is_some_and(|m| m.mark_disconnected(generation));
    if current {
        info!("Upstream: link generation {} lost: {}", generation, reason);
        handler.on_disconnect(reason).await;
    } else {
        debug!("Upstream: stale read loop {} exited", generation);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport used by the application-layer tests.

    use crate::ports::transport::{
        Connector, FrameSink, FrameSource, Transport, TransportError,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    pub struct ChannelSink(pub mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send(&self, frame: String) -> Result<(), TransportError> {
            self.0.send(frame).map_err(|_| TransportError::Closed)
        }
    }

    pub struct ChannelSource(pub mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.0.recv().await)
        }
    }

    /// The far side of one in-memory connection.
    pub struct Remote {
        /// Frames the client sent.
        pub inbox: mpsc::UnboundedReceiver<String>,
        /// Push frames to the client; drop to close.
        pub outbox: mpsc::UnboundedSender<String>,
    }

    impl Remote {
        pub fn push(&self, frame: &str) {
            let _ = self.outbox.send(frame.to_string());
        }

        pub async fn next(&mut self) -> String {
            self.inbox.recv().await.expect("client closed")
        }
    }

    /// Connector handing out in-memory links. Each connect greets with
    /// `greeting` and publishes the remote end on `remotes`.
    pub struct MemoryConnector {
        greeting: Mutex<Option<String>>,
        remotes: mpsc::UnboundedSender<Remote>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl MemoryConnector {
        pub fn new(greeting: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    greeting: Mutex::new(Some(greeting.to_string())),
                    remotes: tx,
                    fail: Default::default(),
                }),
                rx,
            )
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Transport, TransportError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Connect("refused".into()));
            }
            let (to_remote, inbox) = mpsc::unbounded_channel();
            let (outbox, from_remote) = mpsc::unbounded_channel();
            if let Some(greeting) = self.greeting.lock().unwrap().clone() {
                let _ = outbox.send(greeting);
            }
            let _ = self.remotes.send(Remote { inbox, outbox });
            Ok(Transport::new(
                Arc::new(ChannelSink(to_remote)),
                Box::new(ChannelSource(from_remote)),
            ))
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryConnector;
    use super::*;
    use tokio::sync::mpsc;

    struct Recorder {
        frames: mpsc::UnboundedSender<String>,
        disconnects: mpsc::UnboundedSender<RelayError>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn on_frame(&self, frame: String) {
            let _ = self.frames.send(frame);
        }

        async fn on_disconnect(&self, reason: RelayError) {
            let _ = self.disconnects.send(reason);
        }
    }

    fn recorder() -> (
        Arc<Recorder>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<RelayError>,
    ) {
        let (ftx, frx) = mpsc::unbounded_channel();
        let (dtx, drx) = mpsc::unbounded_channel();
        (
            Arc::new(Recorder {
                frames: ftx,
                disconnects: dtx,
            }),
            frx,
            drx,
        )
    }

    #[tokio::test]
    async fn test_connect_requires_ready() {
        let (connector, _remotes) = MemoryConnector::new("!:No browser connected");
        let manager = UpstreamManager::new(connector);
        let (handler, _, _) = recorder();

        let err = manager.connect(handler).await.unwrap_err();
        assert!(matches!(err, RelayError::HandshakeFailed(msg) if msg.contains("No browser")));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (connector, _remotes) = MemoryConnector::new(READY);
        let manager = UpstreamManager::new(connector);
        assert_eq!(
            manager.send("a:1".into()).await,
            Err(RelayError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_frames_reach_handler_and_sends_reach_remote() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let manager = UpstreamManager::new(connector);
        let (handler, mut frames, _) = recorder();

        manager.connect(handler).await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        manager.send("a:1+1".into()).await.unwrap();
        assert_eq!(remote.next().await, "a:1+1");

        remote.push("a:2");
        assert_eq!(frames.recv().await.unwrap(), "a:2");
    }

    #[tokio::test]
    async fn test_remote_close_notifies_and_clears() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let manager = UpstreamManager::new(connector);
        let (handler, _, mut disconnects) = recorder();

        manager.connect(handler).await.unwrap();
        let remote = remotes.recv().await.unwrap();
        drop(remote);

        let reason = disconnects.recv().await.unwrap();
        assert!(reason.is_disconnect());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_ignores_stale_loop() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let manager = UpstreamManager::new(connector);
        let (handler, mut frames, mut disconnects) = recorder();

        manager.connect(handler.clone()).await.unwrap();
        let first = remotes.recv().await.unwrap();
        manager.reconnect(handler).await.unwrap();
        let second = remotes.recv().await.unwrap();

        drop(first);
        second.push("still here");
        assert_eq!(frames.recv().await.unwrap(), "still here");
        assert!(manager.is_connected());
        assert!(disconnects.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ensure_connected_is_lazy() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let manager = UpstreamManager::new(connector);
        let (handler, _, _) = recorder();

        manager.ensure_connected(handler.clone()).await.unwrap();
        manager.ensure_connected(handler).await.unwrap();
        assert!(remotes.recv().await.is_some());
        assert!(remotes.try_recv().is_err());
    }
}
