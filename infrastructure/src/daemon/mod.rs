//! Local multiplexing daemon
//!
//! The daemon owns one upstream link and serves the line protocol on a
//! per-user unix socket. Callers reach it through [`DaemonClient`], which
//! starts a detached daemon on demand.

mod client;
mod paths;
mod runtime;
mod spawn;

pub use client::{
    DaemonClient, DaemonSession, DaemonStatus, KILL_VERSION, KillOutcome, RequestWriter,
    ResponseStream,
};
pub use paths::{socket_path, socket_path_in};
pub use runtime::{DaemonExit, run_daemon};
pub use spawn::spawn_detached;

use eye_domain::RelayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("daemon socket {path}: {source}")]
    Socket {
        path: String,
        source: std::io::Error,
    },

    #[error("a daemon is already listening on {0}")]
    AlreadyRunning(String),

    #[error("failed to start daemon: {0}")]
    Spawn(std::io::Error),

    #[error("daemon not available")]
    Unavailable,

    #[error("daemon closed the connection")]
    Closed,

    #[error("unexpected daemon reply: {0}")]
    Protocol(String),

    #[error("daemon I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),
}
