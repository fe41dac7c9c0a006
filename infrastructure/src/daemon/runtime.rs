//! Hosting the multiplexer on a unix socket.

use super::DaemonError;
use eye_application::ports::transport::Connector;
use eye_application::upstream::UpstreamManager;
use eye_application::use_cases::multiplex::{ExitReason, Multiplexer};
use eye_domain::RESTART_EXIT_DELAY;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// How the daemon ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonExit {
    Requested(ExitReason),
    Signalled,
}

/// The socket file this process created. Removed on drop unless another
/// daemon has replaced it since.
struct BoundSocket {
    path: PathBuf,
    inode: Option<u64>,
}

impl BoundSocket {
    async fn bind(path: &Path) -> Result<(UnixListener, Self), DaemonError> {
        if path.symlink_metadata().is_ok() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(DaemonError::AlreadyRunning(path.display().to_string()));
            }
            debug!("Daemon: removing stale socket {}", path.display());
            let _ = std::fs::remove_file(path);
        }

        let listener = UnixListener::bind(path).map_err(|source| DaemonError::Socket {
            path: path.display().to_string(),
            source,
        })?;
        let inode = inode_of(path);
        Ok((
            listener,
            Self {
                path: path.to_path_buf(),
                inode,
            },
        ))
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        if self.inode.is_some() && inode_of(&self.path) == self.inode {
            let _ = std::fs::remove_file(&self.path);
            debug!("Daemon: removed socket {}", self.path.display());
        }
    }
}

fn inode_of(path: &Path) -> Option<u64> {
    path.symlink_metadata().ok().map(|m| m.ino())
}

/// Run the daemon until the multiplexer asks to stop or a signal arrives.
///
/// The socket is bound before the upstream link is opened so that callers
/// polling for a freshly spawned daemon find it early.
pub async fn run_daemon(
    socket: &Path,
    build_version: &str,
    connector: Arc<dyn Connector>,
) -> Result<DaemonExit, DaemonError> {
    let (listener, bound) = BoundSocket::bind(socket).await?;
    info!(
        "Daemon: build {} listening on {}",
        build_version,
        socket.display()
    );

    let upstream = UpstreamManager::new(connector);
    let (mux, mut exits) = Multiplexer::new(build_version, upstream);
    mux.connect_upstream().await?;

    let idle = tokio::spawn(Arc::clone(&mux).watch_idle());
    let accept = tokio::spawn(accept_loop(listener, Arc::clone(&mux)));

    let outcome = tokio::select! {
        Some(reason) = exits.recv() => DaemonExit::Requested(reason),
        _ = shutdown_signal() => DaemonExit::Signalled,
    };

    accept.abort();
    idle.abort();
    drop(bound);

    if matches!(
        outcome,
        DaemonExit::Requested(ExitReason::VersionMismatch { .. })
    ) {
        tokio::time::sleep(RESTART_EXIT_DELAY).await;
    }

    match &outcome {
        DaemonExit::Requested(reason) => info!("Daemon: exiting, {}", reason),
        DaemonExit::Signalled => info!("Daemon: exiting on signal"),
    }
    Ok(outcome)
}

async fn accept_loop(listener: UnixListener, mux: Arc<Multiplexer>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let (read, write) = stream.into_split();
                tokio::spawn(Arc::clone(&mux).serve_caller(BufReader::new(read), write));
            }
            Err(e) => {
                warn!("Daemon: accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Daemon: cannot watch SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonClient, DaemonStatus};
    use crate::testing::FakeConnector;

    async fn wait_for_socket(path: &Path) {
        for _ in 0..50 {
            if UnixStream::connect(path).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon socket never appeared");
    }

    #[tokio::test]
    async fn test_daemon_serves_callers_and_retires_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("eye-test.sock");
        let (connector, mut browsers) = FakeConnector::new();

        let daemon = {
            let socket = socket.clone();
            tokio::spawn(async move { run_daemon(&socket, "v1", connector).await })
        };
        let mut browser = browsers.recv().await.unwrap();
        wait_for_socket(&socket).await;

        let client = DaemonClient::new(&socket, "v1");
        let mut session = client.connect().await.unwrap();

        let eval = tokio::spawn(async move { session.eval("a:1+1").await });
        assert_eq!(browser.next().await, "a:1+1");
        browser.reply("a:2");
        let delivery = eval.await.unwrap().unwrap().unwrap();
        assert!(delivery.is_success());
        assert_eq!(delivery.payload, "2");

        let newer = DaemonClient::new(&socket, "v2");
        assert!(matches!(newer.status().await, DaemonStatus::Mismatched));

        let exit = daemon.await.unwrap().unwrap();
        assert!(matches!(
            exit,
            DaemonExit::Requested(ExitReason::VersionMismatch { .. })
        ));
        assert!(socket.symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn test_refuses_to_steal_a_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("eye-live.sock");
        let _listener = UnixListener::bind(&socket).unwrap();

        let (connector, _browsers) = FakeConnector::new();
        let err = run_daemon(&socket, "v1", connector).await.unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning(_)));
        assert!(socket.symlink_metadata().is_ok());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("eye-stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.symlink_metadata().is_ok());

        let (listener, bound) = BoundSocket::bind(&socket).await.unwrap();
        assert!(bound.inode.is_some());
        drop(listener);
        drop(bound);
        assert!(socket.symlink_metadata().is_err());
    }
}
