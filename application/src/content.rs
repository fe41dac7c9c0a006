//! Content bridge: pages talking to the user's browser extension
//!
//! Each user has at most one extension connection; a newer one replaces the
//! older. Pages send JSON objects, optionally carrying a string `"id"`. A
//! request with an id is forwarded under a relay-assigned id and the
//! extension's reply is routed back to the page that asked, with the page's
//! own id restored. Requests without an id are forwarded and forgotten.
//!
//! ```text
//! page                       relay                        extension
//!   {"id":"q1",...}  ──────▶ register c1 ─────────────▶ {"id":"c1",...}
//!                                         ◀───────────── {"id":"c1","result":..}
//!                    ◀────── {"id":"q1","result":..}
//! ```

use crate::correlation::CorrelationTable;
use crate::ports::transport::FrameSink;
use dashmap::DashMap;
use eye_domain::util::preview;
use eye_domain::{RelayError, RequestId, RoutingKey};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const EXTENSION_NOT_CONNECTED: &str = "Extension not connected";

static CONTENT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

type JsonObject = Map<String, Value>;

/// All users' content bridges.
#[derive(Default)]
pub struct ContentBridgeRegistry {
    bridges: DashMap<RoutingKey, Arc<ContentBridge>>,
}

impl ContentBridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bridge(&self, key: &RoutingKey) -> Arc<ContentBridge> {
        self.bridges
            .entry(key.clone())
            .or_insert_with(|| ContentBridge::new(key.clone()))
            .clone()
    }

    /// Number of users with a live extension.
    pub fn connected_extensions(&self) -> usize {
        self.bridges
            .iter()
            .filter(|e| e.value().has_extension())
            .count()
    }
}

struct Extension {
    slot: u64,
    sink: Arc<dyn FrameSink>,
}

pub struct ContentBridge {
    key: RoutingKey,
    extension: Mutex<Option<Extension>>,
    pending: Arc<CorrelationTable<JsonObject>>,
    next_slot: AtomicU64,
}

impl ContentBridge {
    fn new(key: RoutingKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            extension: Mutex::new(None),
            pending: CorrelationTable::new(),
            next_slot: AtomicU64::new(1),
        })
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    /// Make `sink` the user's extension, displacing any previous one.
    pub fn register_extension(self: &Arc<Self>, sink: Arc<dyn FrameSink>) -> ExtensionHandle {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock_extension().replace(Extension { slot, sink });
        if previous.is_some() {
            info!("Content[{}]: extension replaced by connection {}", self.key, slot);
        } else {
            info!("Content[{}]: extension connected ({})", self.key, slot);
        }
        ExtensionHandle {
            bridge: Arc::clone(self),
            slot,
        }
    }

    fn release_extension(&self, slot: u64) {
        let released = {
            let mut extension = self.lock_extension();
            if extension.as_ref().is_some_and(|e| e.slot == slot) {
                *extension = None;
                true
            } else {
                false
            }
        };
        if released {
            info!("Content[{}]: extension {} disconnected", self.key, slot);
            self.pending
                .fail_all(RelayError::transport("Extension disconnected"));
        }
    }

    pub fn has_extension(&self) -> bool {
        self.lock_extension().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Handle one frame from a page and produce the reply for it, if any.
    ///
    /// Waits for the extension when the request carries an id. Frames that
    /// are not JSON objects are ignored.
    pub async fn request(&self, frame: &str) -> Option<String> {
        let Ok(Value::Object(mut request)) = serde_json::from_str::<Value>(frame) else {
            debug!("Content[{}]: ignoring page frame {}", self.key, preview(frame));
            return None;
        };
        let caller_id = request.get("id").and_then(Value::as_str).map(str::to_owned);

        if request.get("action").and_then(Value::as_str) == Some("ping") {
            return caller_id.map(|id| json!({ "id": id, "result": "pong" }).to_string());
        }

        let Some(sink) = self.extension_sink() else {
            return caller_id.map(|id| error_reply(&id, EXTENSION_NOT_CONNECTED));
        };

        let Some(caller_id) = caller_id else {
            if let Err(e) = sink.send(frame.to_string()).await {
                warn!("Content[{}]: extension write failed: {}", self.key, e);
            }
            return None;
        };

        let outcome = self.forward(&sink, &mut request).await;
        Some(match outcome {
            Ok(mut reply) => {
                reply.insert("id".to_string(), Value::String(caller_id));
                Value::Object(reply).to_string()
            }
            Err(e) => error_reply(&caller_id, &e.to_string()),
        })
    }

    async fn forward(
        &self,
        sink: &Arc<dyn FrameSink>,
        request: &mut JsonObject,
    ) -> Result<JsonObject, RelayError> {
        let n = CONTENT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::sequenced("c", n)
            .ok_or_else(|| RelayError::Serialization(format!("bad request counter {n}")))?;
        request.insert("id".to_string(), Value::String(id.to_string()));
        let json = serde_json::to_string(request)?;

        let waiter = self.pending.register(id.clone())?;
        sink.send(json).await?;
        debug!("Content[{}]: request {} forwarded", self.key, id);
        waiter.wait().await
    }

    /// Dispatch one frame read from the extension.
    pub fn handle_extension_frame(&self, frame: &str) {
        let Ok(Value::Object(reply)) = serde_json::from_str::<Value>(frame) else {
            debug!("Content[{}]: ignoring extension frame {}", self.key, preview(frame));
            return;
        };

        if reply.get("action").and_then(Value::as_str) == Some("tabList")
            && let Some(tabs) = reply.get("tabs").and_then(Value::as_array)
        {
            info!("Content[{}]: extension reports {} tab(s)", self.key, tabs.len());
        }

        let Some(id) = reply.get("id").and_then(Value::as_str).map(str::to_owned) else {
            return;
        };
        let delivered = RequestId::parse(&id).is_some_and(|rid| self.pending.fulfil(&rid, reply));
        if !delivered {
            debug!("Content[{}]: no pending request for {}", self.key, id);
        }
    }

    fn extension_sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.lock_extension().as_ref().map(|e| Arc::clone(&e.sink))
    }

    fn lock_extension(&self) -> std::sync::MutexGuard<'_, Option<Extension>> {
        self.extension.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn error_reply(id: &str, message: &str) -> String {
    json!({ "id": id, "error": message }).to_string()
}

/// Keeps an extension registered until dropped.
pub struct ExtensionHandle {
    bridge: Arc<ContentBridge>,
    slot: u64,
}

impl ExtensionHandle {
    pub fn bridge(&self) -> &Arc<ContentBridge> {
        &self.bridge
    }
}

impl Drop for ExtensionHandle {
    fn drop(&mut self) {
        self.bridge.release_extension(self.slot);
    }
}
