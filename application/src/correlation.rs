//! Correlation table: request ID -> one-shot completion slot.
//!
//! Every component that multiplexes callers over a shared link (the local
//! daemon, the direct client, the server hub) uses one of these. A
//! registration yields a [`Waiter`]; the link's read loop completes it with
//! [`CorrelationTable::fulfil`]. Whichever of fulfil, eviction or timeout
//! happens first wins; the loser is a silent no-op.

use eye_domain::{REQUEST_TIMEOUT, RelayError, ReplyStatus, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

type Outcome<T> = Result<T, RelayError>;

struct Entry<T> {
    /// Distinguishes successive registrations under the same ID.
    token: u64,
    tx: oneshot::Sender<Outcome<T>>,
    created_at: Instant,
}

/// A structured reply as delivered to a local caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: ReplyStatus,
    pub payload: String,
}

impl Delivery {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Success,
            payload: payload.into(),
        }
    }

    pub fn failure(payload: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Failure,
            payload: payload.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}

/// Pending-request table keyed by [`RequestId`].
pub struct CorrelationTable<T> {
    entries: Mutex<HashMap<RequestId, Entry<T>>>,
    next_token: AtomicU64,
    timeout: std::time::Duration,
}

impl<T: Send + 'static> CorrelationTable<T> {
    pub fn new() -> Arc<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Table whose waiters give up after `timeout` instead of the default.
    pub fn with_timeout(timeout: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            timeout,
        })
    }

    /// Register a waiter, refusing an ID that is already pending.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<Waiter<T>, RelayError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(RelayError::DuplicateId(id.to_string()));
        }
        Ok(self.insert(&mut entries, id))
    }

    /// Register a waiter; a waiter already pending under `id` is completed
    /// with [`RelayError::Superseded`].
    pub fn register_replacing(self: &Arc<Self>, id: RequestId) -> Waiter<T> {
        let mut entries = self.lock();
        if let Some(previous) = entries.remove(&id) {
            debug!(
                "Correlation: id {} re-registered after {:?}, superseding",
                id,
                previous.created_at.elapsed()
            );
            let _ = previous.tx.send(Err(RelayError::Superseded));
        }
        self.insert(&mut entries, id)
    }

    fn insert(
        self: &Arc<Self>,
        entries: &mut HashMap<RequestId, Entry<T>>,
        id: RequestId,
    ) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id.clone(),
            Entry {
                token,
                tx,
                created_at: Instant::now(),
            },
        );
        Waiter {
            id,
            token,
            rx,
            table: Arc::clone(self),
        }
    }

    /// Complete the waiter for `id`. Returns whether a live waiter took it.
    pub fn fulfil(&self, id: &RequestId, value: T) -> bool {
        self.complete(id, Ok(value))
    }

    /// Complete the waiter for `id` with an error.
    pub fn reject(&self, id: &RequestId, err: RelayError) -> bool {
        self.complete(id, Err(err))
    }

    fn complete(&self, id: &RequestId, outcome: Outcome<T>) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };
        debug!(
            "Correlation: completing {} after {:?}",
            id,
            entry.created_at.elapsed()
        );
        entry.tx.send(outcome).is_ok()
    }

    /// Drop the entry for `id`, failing its waiter with a timeout.
    pub fn evict(&self, id: &RequestId) -> bool {
        self.complete(id, Err(RelayError::Timeout))
    }

    /// Evict only if the entry still belongs to the given registration.
    fn evict_own(&self, id: &RequestId, token: u64) {
        let mut entries = self.lock();
        if entries.get(id).is_some_and(|e| e.token == token)
            && let Some(entry) = entries.remove(id)
        {
            let _ = entry.tx.send(Err(RelayError::Timeout));
        }
    }

    fn forget_own(&self, id: &RequestId, token: u64) {
        let mut entries = self.lock();
        if entries.get(id).is_some_and(|e| e.token == token) {
            entries.remove(id);
        }
    }

    /// Fail every pending waiter with `err`, leaving the table empty.
    pub fn fail_all(&self, err: RelayError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(err.clone()));
        }
        if count > 0 {
            debug!("Correlation: failed {} pending request(s): {}", count, err);
        }
        count
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Entry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one pending request.
///
/// Dropping it without waiting removes the entry, so a caller that goes
/// away leaves nothing behind.
pub struct Waiter<T: Send + 'static> {
    id: RequestId,
    token: u64,
    rx: oneshot::Receiver<Outcome<T>>,
    table: Arc<CorrelationTable<T>>,
}

impl<T: Send + 'static> Waiter<T> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the reply, evicting the entry on timeout.
    pub async fn wait(mut self) -> Result<T, RelayError> {
        match tokio::time::timeout(self.table.timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RelayError::transport("request abandoned")),
            Err(_) => {
                self.table.evict_own(&self.id, self.token);
                // A reply that raced the timer is already in the channel.
                self.rx.try_recv().unwrap_or(Err(RelayError::Timeout))
            }
        }
    }
}

impl<T: Send + 'static> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.table.forget_own(&self.id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(raw: &str) -> RequestId {
        RequestId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_fulfil_delivers_to_waiter() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("a")).unwrap();
        assert!(table.is_pending(&id("a")));

        assert!(table.fulfil(&id("a"), "42".to_string()));
        assert_eq!(waiter.wait().await.unwrap(), "42");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_second_fulfil_is_noop() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("a")).unwrap();
        assert!(table.fulfil(&id("a"), "first".to_string()));
        assert!(!table.fulfil(&id("a"), "second".to_string()));
        assert_eq!(waiter.wait().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_fulfil_unknown_id_returns_false() {
        let table = CorrelationTable::<String>::new();
        assert!(!table.fulfil(&id("ghost"), "x".to_string()));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let table = CorrelationTable::<String>::new();
        let _waiter = table.register(id("a")).unwrap();
        assert_eq!(
            table.register(id("a")).err(),
            Some(RelayError::DuplicateId("a".into()))
        );
    }

    #[tokio::test]
    async fn test_register_replacing_supersedes_previous() {
        let table = CorrelationTable::<String>::new();
        let first = table.register(id("a")).unwrap();
        let second = table.register_replacing(id("a"));
        assert_eq!(table.len(), 1);

        assert!(table.fulfil(&id("a"), "done".to_string()));
        assert_eq!(first.wait().await, Err(RelayError::Superseded));
        assert_eq!(second.wait().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_dropping_superseded_waiter_keeps_new_entry() {
        let table = CorrelationTable::<String>::new();
        let first = table.register(id("a")).unwrap();
        let _second = table.register_replacing(id("a"));
        drop(first);
        assert!(table.is_pending(&id("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_evicts() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("slow")).unwrap();

        let result = waiter.wait().await;
        assert_eq!(result, Err(RelayError::Timeout));
        assert!(table.is_empty());
        // A late reply finds nobody waiting.
        assert!(!table.fulfil(&id("slow"), "late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_just_before_deadline_wins() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("a")).unwrap();

        let t = Arc::clone(&table);
        tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TIMEOUT - Duration::from_millis(1)).await;
            t.fulfil(&id("a"), "made it".to_string());
        });

        assert_eq!(waiter.wait().await.unwrap(), "made it");
    }

    #[tokio::test]
    async fn test_evict_fails_waiter_with_timeout() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("a")).unwrap();
        assert!(table.evict(&id("a")));
        assert_eq!(waiter.wait().await, Err(RelayError::Timeout));
    }

    #[tokio::test]
    async fn test_fail_all_reaches_every_waiter() {
        let table = CorrelationTable::<String>::new();
        let a = table.register(id("a")).unwrap();
        let b = table.register(id("b")).unwrap();

        let err = RelayError::transport("Browser disconnected");
        assert_eq!(table.fail_all(err.clone()), 2);
        assert_eq!(a.wait().await, Err(err.clone()));
        assert_eq!(b.wait().await, Err(err));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_waiter_removes_entry() {
        let table = CorrelationTable::<String>::new();
        let waiter = table.register(id("a")).unwrap();
        drop(waiter);
        assert!(table.is_empty());
        assert!(!table.fulfil(&id("a"), "x".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout() {
        let table = CorrelationTable::<Delivery>::with_timeout(Duration::from_secs(1));
        let waiter = table.register(id("a")).unwrap();
        let started = Instant::now();
        assert_eq!(waiter.wait().await, Err(RelayError::Timeout));
        assert!(started.elapsed() < REQUEST_TIMEOUT);
    }
}
