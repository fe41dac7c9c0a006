//! Server-side correlation hub
//!
//! State is partitioned by [`RoutingKey`]: each user owns a [`UserHub`] with
//! at most one primary bridge connection (the browser tab that evaluates),
//! any number of subscriber connections (eye clients that see every reply),
//! and a correlation table for structured requests.
//!
//! Registrations are RAII handles. Dropping a [`PrimaryHandle`] only
//! unregisters the primary it registered, so a stale connection closing
//! after a newer one took over changes nothing.

use crate::correlation::CorrelationTable;
use crate::ports::transport::FrameSink;
use dashmap::DashMap;
use eye_domain::protocol::bridge::{
    BridgeFrame, PONG, STRUCTURED_ID_FIELD, eye_command, structured_command,
};
use eye_domain::util::preview;
use eye_domain::{RelayError, RequestId, RoutingKey, Submission};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Process-wide counter for structured request IDs.
static STRUCTURED_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// All users' hubs.
#[derive(Default)]
pub struct HubRegistry {
    hubs: DashMap<RoutingKey, Arc<UserHub>>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hub for `key`, created on first use.
    pub fn hub(&self, key: &RoutingKey) -> Arc<UserHub> {
        self.hubs
            .entry(key.clone())
            .or_insert_with(|| UserHub::new(key.clone()))
            .clone()
    }

    pub fn get(&self, key: &RoutingKey) -> Option<Arc<UserHub>> {
        self.hubs.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of users with a live primary bridge.
    pub fn bridged_users(&self) -> usize {
        self.hubs.iter().filter(|e| e.value().has_primary()).count()
    }
}

struct Primary {
    slot: u64,
    sink: Arc<dyn FrameSink>,
}

/// One user's primary, subscribers and pending structured requests.
pub struct UserHub {
    key: RoutingKey,
    primary: Mutex<Option<Primary>>,
    subscribers: Mutex<HashMap<u64, Arc<dyn FrameSink>>>,
    pending: Arc<CorrelationTable<String>>,
    next_slot: AtomicU64,
}

impl UserHub {
    fn new(key: RoutingKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            primary: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            pending: CorrelationTable::new(),
            next_slot: AtomicU64::new(1),
        })
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    /// Make `sink` this user's primary, displacing any previous one.
    pub fn register_primary(self: &Arc<Self>, sink: Arc<dyn FrameSink>) -> PrimaryHandle {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock_primary().replace(Primary { slot, sink });
        if previous.is_some() {
            info!("Hub[{}]: primary replaced by connection {}", self.key, slot);
        } else {
            info!("Hub[{}]: primary connected ({})", self.key, slot);
        }
        PrimaryHandle {
            hub: Arc::clone(self),
            slot,
        }
    }

    fn release_primary(&self, slot: u64) {
        let released = {
            let mut primary = self.lock_primary();
            if primary.as_ref().is_some_and(|p| p.slot == slot) {
                *primary = None;
                true
            } else {
                false
            }
        };
        if released {
            info!("Hub[{}]: primary {} disconnected", self.key, slot);
            self.pending
                .fail_all(RelayError::transport("Browser disconnected"));
        } else {
            debug!("Hub[{}]: stale primary {} closed", self.key, slot);
        }
    }

    pub fn register_subscriber(self: &Arc<Self>, sink: Arc<dyn FrameSink>) -> SubscriberHandle {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().insert(slot, sink);
        debug!("Hub[{}]: subscriber {} joined", self.key, slot);
        SubscriberHandle {
            hub: Arc::clone(self),
            slot,
        }
    }

    pub fn has_primary(&self) -> bool {
        self.lock_primary().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn primary_sink(&self) -> Result<Arc<dyn FrameSink>, RelayError> {
        self.lock_primary()
            .as_ref()
            .map(|p| Arc::clone(&p.sink))
            .ok_or(RelayError::NoBridgeConnected)
    }

    /// Send a structured command to the primary and wait for its reply body.
    pub async fn send_structured(&self, mut command: Map<String, Value>) -> Result<String, RelayError> {
        let sink = self.primary_sink()?;
        let n = STRUCTURED_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::sequenced("s", n)
            .ok_or_else(|| RelayError::Serialization(format!("bad request counter {n}")))?;

        command.insert(
            STRUCTURED_ID_FIELD.to_string(),
            Value::String(id.to_string()),
        );
        let json = serde_json::to_string(&Value::Object(command))?;

        let waiter = self.pending.register(id.clone())?;
        sink.send(structured_command(&json)).await?;
        debug!("Hub[{}]: structured request {} sent", self.key, id);
        waiter.wait().await
    }

    /// Forward a subscriber's frame to the primary as an eye command.
    ///
    /// Nothing is awaited here: the reply comes back through
    /// [`handle_bridge_frame`](Self::handle_bridge_frame) as a broadcast.
    pub async fn relay_raw(&self, frame: &str) -> Result<Submission, RelayError> {
        let submission = Submission::parse(frame);
        let sink = self.primary_sink()?;
        sink.send(eye_command(&submission)).await?;
        Ok(submission)
    }

    /// Dispatch one frame read from the primary. Returns a frame to send
    /// back to the primary, if any.
    pub async fn handle_bridge_frame(&self, frame: &str) -> Option<String> {
        match BridgeFrame::parse(frame) {
            BridgeFrame::EyeReply(reply) => {
                self.broadcast(reply).await;
                None
            }
            BridgeFrame::StructuredReply { request_id, body } => {
                let delivered = RequestId::parse(request_id)
                    .is_some_and(|id| self.pending.fulfil(&id, body.to_string()));
                if !delivered {
                    debug!(
                        "Hub[{}]: no pending request for {}, dropping reply",
                        self.key, request_id
                    );
                }
                None
            }
            BridgeFrame::Ping => Some(PONG.to_string()),
            BridgeFrame::Other(other) => {
                debug!("Hub[{}]: ignoring bridge frame {}", self.key, preview(other));
                None
            }
        }
    }

    /// Send `frame` to every subscriber; failures are logged and skipped.
    pub async fn broadcast(&self, frame: &str) {
        let targets: Vec<(u64, Arc<dyn FrameSink>)> = self
            .lock_subscribers()
            .iter()
            .map(|(slot, sink)| (*slot, Arc::clone(sink)))
            .collect();
        for (slot, sink) in targets {
            if let Err(e) = sink.send(frame.to_string()).await {
                warn!("Hub[{}]: subscriber {} write failed: {}", self.key, slot, e);
            }
        }
    }

    fn lock_primary(&self) -> std::sync::MutexGuard<'_, Option<Primary>> {
        self.primary.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<dyn FrameSink>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a primary registered until dropped.
pub struct PrimaryHandle {
    hub: Arc<UserHub>,
    slot: u64,
}

impl PrimaryHandle {
    pub fn hub(&self) -> &Arc<UserHub> {
        &self.hub
    }
}

impl Drop for PrimaryHandle {
    fn drop(&mut self) {
        self.hub.release_primary(self.slot);
    }
}

/// Keeps a subscriber registered until dropped.
pub struct SubscriberHandle {
    hub: Arc<UserHub>,
    slot: u64,
}

impl SubscriberHandle {
    pub fn hub(&self) -> &Arc<UserHub> {
        &self.hub
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if self.hub.lock_subscribers().remove(&self.slot).is_some() {
            debug!("Hub[{}]: subscriber {} left", self.hub.key, self.slot);
        }
    }
}
