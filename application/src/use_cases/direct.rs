//! Daemon-less client
//!
//! Used when no daemon can be reached and by the stdio tool bridge: the
//! process holds its own upstream link and correlation table. Every inbound
//! frame is also published on an optional monitor channel so an interactive
//! session can print replies it did not ask for.

use crate::correlation::{CorrelationTable, Delivery, Waiter};
use crate::ports::transport::Connector;
use crate::upstream::{InboundHandler, UpstreamManager};
use async_trait::async_trait;
use eye_domain::{RelayError, Reply, RequestId, Submission};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// What the monitor channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Frame(String),
    Disconnected(RelayError),
}

pub struct DirectClient {
    upstream: Arc<UpstreamManager>,
    pending: Arc<CorrelationTable<Delivery>>,
    monitor: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
    next_id: AtomicU64,
}

impl DirectClient {
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            upstream: UpstreamManager::new(connector),
            pending: CorrelationTable::new(),
            monitor: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to every inbound frame. Replaces any earlier monitor.
    pub fn monitor(&self) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.monitor.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    fn handler(self: &Arc<Self>) -> Arc<dyn InboundHandler> {
        Arc::clone(self) as Arc<dyn InboundHandler>
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), RelayError> {
        self.upstream.connect(self.handler()).await
    }

    pub async fn ensure_connected(self: &Arc<Self>) -> Result<(), RelayError> {
        self.upstream.ensure_connected(self.handler()).await
    }

    pub fn is_connected(&self) -> bool {
        self.upstream.is_connected()
    }

    /// Send a raw caller frame. ID-bearing frames return a waiter; an ID
    /// that is already in flight is refused.
    pub async fn submit(&self, frame: &str) -> Result<Option<Waiter<Delivery>>, RelayError> {
        let submission = Submission::parse(frame);
        let waiter = match submission.id() {
            Some(id) => Some(self.pending.register(id.clone())?),
            None => None,
        };
        self.upstream.send(frame.to_string()).await?;
        Ok(waiter)
    }

    /// Send a raw caller frame and wait for its reply, if it expects one.
    pub async fn eval(&self, frame: &str) -> Result<Option<Delivery>, RelayError> {
        match self.submit(frame).await? {
            Some(waiter) => waiter.wait().await.map(Some),
            None => Ok(None),
        }
    }

    /// Evaluate `expression` under a generated ID, connecting lazily.
    pub async fn evaluate(self: &Arc<Self>, expression: &str) -> Result<Delivery, RelayError> {
        self.ensure_connected().await?;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::sequenced("m", n)
            .ok_or_else(|| RelayError::Serialization(format!("bad request counter {n}")))?;
        let frame = Submission::Request {
            id,
            expression: expression.to_string(),
        }
        .encode();

        self.eval(&frame)
            .await?
            .ok_or_else(|| RelayError::transport("no reply expected for generated id"))
    }

    pub fn disconnect(&self) {
        self.upstream.disconnect();
    }

    fn publish(&self, event: InboundEvent) {
        let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        let delivered = monitor.as_ref().is_some_and(|tx| tx.send(event).is_ok());
        if !delivered {
            *monitor = None;
        }
    }
}

#[async_trait]
impl InboundHandler for DirectClient {
    async fn on_frame(&self, frame: String) {
        if let Reply::Structured {
            id,
            status,
            payload,
        } = Reply::parse(&frame)
            && !self.pending.fulfil(&id, Delivery { status, payload })
        {
            debug!("Direct: no waiter for {}", id);
        }
        self.publish(InboundEvent::Frame(frame));
    }

    async fn on_disconnect(&self, reason: RelayError) {
        self.pending.fail_all(reason.clone());
        self.publish(InboundEvent::Disconnected(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::testing::MemoryConnector;
    use eye_domain::ReplyStatus;
    use eye_domain::protocol::bridge::READY;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_eval_waits_for_matching_reply() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector);
        client.connect().await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.eval("a:document.title").await });
        assert_eq!(remote.next().await, "a:document.title");

        // Someone else's reply first; it must not be mistaken for ours.
        remote.push("other:ignored");
        remote.push("a!:TypeError");
        let delivery = call.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.status, ReplyStatus::Failure);
        assert_eq!(delivery.payload, "TypeError");
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_immediately() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector);
        client.connect().await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        assert_eq!(client.eval("console.log(1)").await.unwrap(), None);
        assert_eq!(remote.next().await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_is_refused() {
        let (connector, _remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector);
        client.connect().await.unwrap();

        let _first = client.submit("a:1").await.unwrap();
        assert_eq!(
            client.submit("a:2").await.err(),
            Some(RelayError::DuplicateId("a".into()))
        );
    }

    #[tokio::test]
    async fn test_evaluate_connects_lazily_with_generated_ids() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector);
        assert!(!client.is_connected());

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.evaluate("1+1").await });
        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(remote.next().await, "m1:1+1");
        remote.push("m1:2");
        assert_eq!(call.await.unwrap().unwrap(), Delivery::success("2"));
    }

    #[tokio::test]
    async fn test_evaluate_reconnects_after_loss() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector.clone());
        let mut events = client.monitor();
        client.connect().await.unwrap();
        drop(remotes.recv().await.unwrap());
        assert!(matches!(
            events.recv().await,
            Some(InboundEvent::Disconnected(_))
        ));

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.evaluate("2").await });
        let mut remote = remotes.recv().await.unwrap();
        let frame = remote.next().await;
        let (id, _) = frame.split_once(':').unwrap();
        remote.push(&format!("{id}:2"));
        assert_eq!(call.await.unwrap().unwrap().payload, "2");
    }

    #[tokio::test]
    async fn test_evaluate_reports_connect_failure() {
        let (connector, _remotes) = MemoryConnector::new(READY);
        connector.fail.store(true, Ordering::SeqCst);
        let client = DirectClient::new(connector);
        assert!(client.evaluate("1").await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_monitor_sees_every_frame() {
        let (connector, mut remotes) = MemoryConnector::new(READY);
        let client = DirectClient::new(connector);
        let mut events = client.monitor();
        client.connect().await.unwrap();
        let remote = remotes.recv().await.unwrap();

        remote.push("hello");
        assert_eq!(
            events.recv().await,
            Some(InboundEvent::Frame("hello".into()))
        );
    }
}
