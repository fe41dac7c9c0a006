//! Caller side of the local socket.

use super::{DaemonError, spawn_detached};
use eye_application::correlation::Delivery;
use eye_domain::{LocalRequest, LocalResponse, Submission};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

/// Version string that no build ever has; presenting it retires the daemon.
pub const KILL_VERSION: &str = "__kill__";

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const SPAWN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SPAWN_POLL_ATTEMPTS: usize = 20;
const RESTART_RETRY_DELAY: Duration = Duration::from_millis(200);
const KILL_GRACE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    NotRunning { stale_socket: bool },
    Matching,
    /// Asking made the daemon retire; the next call starts a fresh one.
    Mismatched,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning { removed_stale: bool },
    Killed,
}

pub struct DaemonClient {
    socket: PathBuf,
    build_version: String,
    autostart: Option<PathBuf>,
}

impl DaemonClient {
    pub fn new(socket: impl Into<PathBuf>, build_version: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            build_version: build_version.into(),
            autostart: None,
        }
    }

    /// Start `exe --daemon` when nothing is listening.
    pub fn with_autostart(mut self, exe: impl Into<PathBuf>) -> Self {
        self.autostart = Some(exe.into());
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Reach a daemon of this build, starting one if needed.
    ///
    /// A `RESTART` answer is retried once after the old daemon has had time
    /// to exit.
    pub async fn connect(&self) -> Result<DaemonSession, DaemonError> {
        for attempt in 0..2 {
            let stream = self.open_or_spawn().await?;
            let mut session = DaemonSession::new(stream);
            match session.handshake(&self.build_version).await? {
                LocalResponse::Accepted => return Ok(session),
                LocalResponse::Restart => {
                    debug!("Daemon asked for a restart (attempt {})", attempt + 1);
                    tokio::time::sleep(RESTART_RETRY_DELAY).await;
                }
                other => return Err(DaemonError::Protocol(other.to_string())),
            }
        }
        Err(DaemonError::Unavailable)
    }

    async fn open_or_spawn(&self) -> Result<UnixStream, DaemonError> {
        if let Some(stream) = try_connect(&self.socket).await {
            return Ok(stream);
        }
        let Some(exe) = &self.autostart else {
            return Err(DaemonError::Unavailable);
        };

        spawn_detached(exe)?;
        for _ in 0..SPAWN_POLL_ATTEMPTS {
            tokio::time::sleep(SPAWN_POLL_INTERVAL).await;
            if let Some(stream) = try_connect(&self.socket).await {
                return Ok(stream);
            }
        }
        Err(DaemonError::Unavailable)
    }

    pub async fn status(&self) -> DaemonStatus {
        let Some(stream) = try_connect(&self.socket).await else {
            return DaemonStatus::NotRunning {
                stale_socket: self.socket.symlink_metadata().is_ok(),
            };
        };
        let mut session = DaemonSession::new(stream);
        match session.handshake(&self.build_version).await {
            Ok(LocalResponse::Accepted) => DaemonStatus::Matching,
            Ok(LocalResponse::Restart) => DaemonStatus::Mismatched,
            _ => DaemonStatus::Unknown,
        }
    }

    pub async fn kill(&self) -> KillOutcome {
        let Some(stream) = try_connect(&self.socket).await else {
            let removed_stale = self.socket.symlink_metadata().is_ok()
                && std::fs::remove_file(&self.socket).is_ok();
            return KillOutcome::NotRunning { removed_stale };
        };

        let (_, mut requests) = DaemonSession::new(stream).into_split();
        let _ = requests
            .send(&LocalRequest::Version(KILL_VERSION.to_string()))
            .await;
        drop(requests);

        tokio::time::sleep(KILL_GRACE).await;
        let _ = std::fs::remove_file(&self.socket);
        info!("Daemon at {} killed", self.socket.display());
        KillOutcome::Killed
    }
}

async fn try_connect(path: &Path) -> Option<UnixStream> {
    tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
        .await
        .ok()?
        .ok()
}

/// One handshaken connection to the daemon.
pub struct DaemonSession {
    responses: ResponseStream,
    requests: RequestWriter,
}

impl DaemonSession {
    fn new(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            responses: ResponseStream {
                lines: BufReader::new(read).lines(),
            },
            requests: RequestWriter { writer: write },
        }
    }

    async fn handshake(&mut self, version: &str) -> Result<LocalResponse, DaemonError> {
        self.requests
            .send(&LocalRequest::Version(version.to_string()))
            .await?;
        self.responses.next().await?.ok_or(DaemonError::Closed)
    }

    /// Submit `frame`. For ID-bearing frames, wait for the correlated
    /// outcome, skipping broadcasts meant for other callers.
    pub async fn eval(&mut self, frame: &str) -> Result<Option<Delivery>, DaemonError> {
        self.requests.eval(frame).await?;
        if Submission::parse(frame).id().is_none() {
            return Ok(None);
        }

        loop {
            match self.responses.next().await?.ok_or(DaemonError::Closed)? {
                LocalResponse::Result(payload) => return Ok(Some(Delivery::success(payload))),
                LocalResponse::Error(payload) => return Ok(Some(Delivery::failure(payload))),
                other => debug!("Daemon: skipping {}", other),
            }
        }
    }

    /// Separate halves for interactive use.
    pub fn into_split(self) -> (ResponseStream, RequestWriter) {
        (self.responses, self.requests)
    }
}

pub struct ResponseStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl ResponseStream {
    /// Next line from the daemon; `None` once it hangs up. Cancel safe.
    pub async fn next(&mut self) -> Result<Option<LocalResponse>, DaemonError> {
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| LocalResponse::parse(&line)))
    }
}

pub struct RequestWriter {
    writer: OwnedWriteHalf,
}

impl RequestWriter {
    pub async fn send(&mut self, request: &LocalRequest) -> Result<(), DaemonError> {
        self.writer
            .write_all(format!("{request}\n").as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn eval(&mut self, frame: &str) -> Result<(), DaemonError> {
        self.send(&LocalRequest::Eval(frame.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// A scripted daemon answering each accepted connection with `script`.
    fn scripted(socket: &Path, script: &'static [&'static str]) -> tokio::task::JoinHandle<Vec<String>> {
        let listener = UnixListener::bind(socket).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            for answer in script {
                seen.push(lines.next_line().await.unwrap().unwrap());
                let _ = write.write_all(format!("{answer}\n").as_bytes()).await;
            }
            while let Ok(Some(line)) = lines.next_line().await {
                seen.push(line);
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_eval_skips_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "VERSION:v1");
            write.write_all(b"OK\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "EVAL:q:document.title");
            write
                .write_all(b"RESP:z:hello\nERR:TypeError: nope\n")
                .await
                .unwrap();
        });

        let client = DaemonClient::new(&socket, "v1");
        let mut session = client.connect().await.unwrap();
        let delivery = session.eval("q:document.title").await.unwrap().unwrap();
        assert!(!delivery.is_success());
        assert_eq!(delivery.payload, "TypeError: nope");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fire_and_forget_does_not_wait() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server = scripted(&socket, &["OK"]);

        let mut session = DaemonClient::new(&socket, "v1").connect().await.unwrap();
        assert_eq!(session.eval("console.log(1)").await.unwrap(), None);
        drop(session);

        assert_eq!(
            server.await.unwrap(),
            vec!["VERSION:v1".to_string(), "EVAL:console.log(1)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_restart_is_retried_against_the_new_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for answer in ["RESTART", "OK"] {
                let (stream, _) = listener.accept().await.unwrap();
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                seen.push(lines.next_line().await.unwrap().unwrap());
                write.write_all(format!("{answer}\n").as_bytes()).await.unwrap();
            }
            seen
        });

        let started = std::time::Instant::now();
        let session = DaemonClient::new(&socket, "v2").connect().await;
        assert!(session.is_ok());
        assert!(started.elapsed() >= RESTART_RETRY_DELAY);
        assert_eq!(
            server.await.unwrap(),
            vec!["VERSION:v2".to_string(), "VERSION:v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_restart_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                let _ = lines.next_line().await;
                let _ = write.write_all(b"RESTART\n").await;
            }
        });

        let client = DaemonClient::new(&socket, "v2");
        assert!(matches!(client.connect().await, Err(DaemonError::Unavailable)));
    }

    #[tokio::test]
    async fn test_no_daemon_without_autostart_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().join("none.sock"), "v1");
        assert!(matches!(client.connect().await, Err(DaemonError::Unavailable)));
        assert_eq!(
            client.status().await,
            DaemonStatus::NotRunning {
                stale_socket: false
            }
        );
    }

    #[tokio::test]
    async fn test_kill_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());

        let client = DaemonClient::new(&socket, "v1");
        assert_eq!(
            client.status().await,
            DaemonStatus::NotRunning { stale_socket: true }
        );
        assert_eq!(
            client.kill().await,
            KillOutcome::NotRunning {
                removed_stale: true
            }
        );
        assert!(socket.symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn test_kill_presents_kill_version() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server = scripted(&socket, &["RESTART"]);

        let client = DaemonClient::new(&socket, "v1");
        assert_eq!(client.kill().await, KillOutcome::Killed);
        assert_eq!(server.await.unwrap(), vec!["VERSION:__kill__".to_string()]);
        assert!(socket.symlink_metadata().is_err());
    }
}
