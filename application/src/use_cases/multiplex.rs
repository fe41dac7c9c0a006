//! Local multiplexing daemon core
//!
//! Many short-lived local callers share one upstream link. Each caller
//! speaks the line protocol from [`eye_domain::protocol::local`]:
//!
//! ```text
//! caller                      daemon                     upstream
//!   VERSION:<build>  ───────▶
//!                    ◀─────── OK | RESTART
//!   EVAL:a:expr      ───────▶ register a ─────────────▶  a:expr
//!                                          ◀─────────── a:result
//!                    ◀─────── OK:result
//!   (everyone else)  ◀─────── RESP:a:result
//! ```
//!
//! The multiplexer never exits the process itself. It reports *why* it
//! should stop on the [`ExitReason`] channel returned by
//! [`Multiplexer::new`], and the hosting runtime acts on it.

use crate::correlation::{CorrelationTable, Delivery};
use crate::upstream::{InboundHandler, UpstreamManager};
use async_trait::async_trait;
use eye_domain::util::preview;
use eye_domain::{
    IDLE_CHECK_INTERVAL, IDLE_TIMEOUT, LocalRequest, LocalResponse, RESTART_EXIT_DELAY, RelayError,
    Reply, RequestId, Submission,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why the daemon wants to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// A caller presented a different build; a fresh daemon should take over.
    VersionMismatch { expected: String, actual: String },
    /// The upstream link is gone; the daemon has nothing left to offer.
    UpstreamLost(RelayError),
    /// No local or upstream traffic for longer than the idle limit.
    Idle(Duration),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::VersionMismatch { expected, actual } => {
                write!(f, "version mismatch (daemon {expected}, caller {actual})")
            }
            ExitReason::UpstreamLost(reason) => write!(f, "upstream lost: {reason}"),
            ExitReason::Idle(idle) => write!(f, "idle for {}s", idle.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallerState {
    AwaitingVersion,
    Ready,
    Closed,
}

#[derive(Default)]
struct Callers {
    writers: HashMap<u64, mpsc::UnboundedSender<LocalResponse>>,
    /// Which caller registered each pending ID; later registrations win.
    owners: HashMap<RequestId, u64>,
}

pub struct Multiplexer {
    build_version: String,
    upstream: Arc<UpstreamManager>,
    pending: Arc<CorrelationTable<Delivery>>,
    callers: Mutex<Callers>,
    next_caller: AtomicU64,
    last_activity: Mutex<Instant>,
    exit_tx: mpsc::UnboundedSender<ExitReason>,
}

impl Multiplexer {
    pub fn new(
        build_version: impl Into<String>,
        upstream: Arc<UpstreamManager>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ExitReason>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let mux = Arc::new(Self {
            build_version: build_version.into(),
            upstream,
            pending: CorrelationTable::new(),
            callers: Mutex::new(Callers::default()),
            next_caller: AtomicU64::new(1),
            last_activity: Mutex::new(Instant::now()),
            exit_tx,
        });
        (mux, exit_rx)
    }

    pub fn build_version(&self) -> &str {
        &self.build_version
    }

    /// Establish the upstream link with this multiplexer as its handler.
    pub async fn connect_upstream(self: &Arc<Self>) -> Result<(), RelayError> {
        let handler: Arc<dyn InboundHandler> = Arc::clone(self) as Arc<dyn InboundHandler>;
        self.upstream.connect(handler).await
    }

    /// Serve one local caller until it disconnects.
    pub async fn serve_caller<R, W>(self: Arc<Self>, reader: R, writer: W)
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let slot = self.next_caller.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, rx));
        let mut lines = reader.lines();
        let mut state = CallerState::AwaitingVersion;
        let mut mismatch = None;

        debug!("Daemon: caller {} connected", slot);
        while state != CallerState::Closed {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("Daemon: caller {} read error: {}", slot, e);
                    break;
                }
            };
            self.touch();

            match LocalRequest::parse(&line) {
                LocalRequest::Version(version) if version == self.build_version => {
                    let _ = tx.send(LocalResponse::Accepted);
                    if state == CallerState::AwaitingVersion {
                        self.lock_callers().writers.insert(slot, tx.clone());
                        state = CallerState::Ready;
                    }
                }
                LocalRequest::Version(version) => {
                    info!(
                        "Daemon: caller {} has build {}, mine is {}; retiring",
                        slot, version, self.build_version
                    );
                    let _ = tx.send(LocalResponse::Restart);
                    mismatch = Some(ExitReason::VersionMismatch {
                        expected: self.build_version.clone(),
                        actual: version,
                    });
                    state = CallerState::Closed;
                }
                LocalRequest::Eval(frame) if state == CallerState::Ready => {
                    self.submit(slot, &tx, frame).await;
                }
                LocalRequest::Eval(_) => {
                    warn!("Daemon: caller {} sent EVAL before VERSION, ignored", slot);
                }
                LocalRequest::Unknown(raw) => {
                    debug!("Daemon: caller {} sent unknown line {}", slot, preview(&raw));
                }
            }
        }

        self.lock_callers().writers.remove(&slot);
        drop(tx);
        debug!("Daemon: caller {} disconnected", slot);

        if let Some(reason) = mismatch {
            // Give RESTART a moment to reach the caller. A waiter still
            // holding this caller's queue must not hold up the exit.
            let _ = tokio::time::timeout(RESTART_EXIT_DELAY, writer_task).await;
            let _ = self.exit_tx.send(reason);
        }
    }

    async fn submit(
        self: &Arc<Self>,
        slot: u64,
        tx: &mpsc::UnboundedSender<LocalResponse>,
        frame: String,
    ) {
        let submission = Submission::parse(&frame);

        if let Some(id) = submission.id() {
            let waiter = self.pending.register_replacing(id.clone());
            self.lock_callers().owners.insert(id.clone(), slot);

            let this = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let id = waiter.id().clone();
                let response = match waiter.wait().await {
                    Ok(delivery) if delivery.is_success() => LocalResponse::Result(delivery.payload),
                    Ok(delivery) => LocalResponse::Error(delivery.payload),
                    Err(e) => {
                        this.release_owner(&id, slot);
                        LocalResponse::Error(e.to_string())
                    }
                };
                let _ = tx.send(response);
            });
        }

        if let Err(e) = self.upstream.send(frame).await {
            warn!("Daemon: upstream send failed: {}", e);
            if let Some(id) = submission.id() {
                self.pending.reject(id, e);
            }
        }
    }

    fn release_owner(&self, id: &RequestId, slot: u64) {
        let mut callers = self.lock_callers();
        if callers.owners.get(id) == Some(&slot) {
            callers.owners.remove(id);
        }
    }

    fn broadcast(&self, frame: &str, except: Option<u64>) {
        let callers = self.lock_callers();
        for (slot, writer) in &callers.writers {
            if Some(*slot) != except {
                let _ = writer.send(LocalResponse::Broadcast(frame.to_string()));
            }
        }
    }

    /// Periodically check for inactivity; reports [`ExitReason::Idle`] once.
    pub async fn watch_idle(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let idle = self.idle_for();
            if idle > IDLE_TIMEOUT {
                info!("Daemon: idle for {}s, exiting", idle.as_secs());
                let _ = self.exit_tx.send(ExitReason::Idle(idle));
                return;
            }
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub fn caller_count(&self) -> usize {
        self.lock_callers().writers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn lock_callers(&self) -> std::sync::MutexGuard<'_, Callers> {
        self.callers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InboundHandler for Multiplexer {
    async fn on_frame(&self, frame: String) {
        self.touch();

        let recipient = match Reply::parse(&frame) {
            Reply::Structured {
                id,
                status,
                payload,
            } => {
                let owner = self.lock_callers().owners.remove(&id);
                if self.pending.fulfil(&id, Delivery { status, payload }) {
                    owner
                } else {
                    None
                }
            }
            Reply::Unstructured(_) => None,
        };

        self.broadcast(&frame, recipient);
    }

    async fn on_disconnect(&self, reason: RelayError) {
        error!("Daemon: upstream disconnected: {}", reason);
        self.pending.fail_all(reason.clone());
        let _ = self.exit_tx.send(ExitReason::UpstreamLost(reason));
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<LocalResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let line = format!("{response}\n");
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
