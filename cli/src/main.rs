//! CLI entrypoint for eye
//!
//! Wires the layers together: configuration, the daemon (or a direct
//! connection when no daemon can be reached), the MCP bridge and the REPL.

use anyhow::Result;
use clap::Parser;
use eye_application::{Connector, Delivery, DirectClient};
use eye_infrastructure::{ConfigError, ConfigLoader, McpServer, WebSocketConnector, logging};
use eye_presentation::{Cli, ConsoleFormatter, DirectBackend, EvalRepl};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Identifies this build to a running daemon; a mismatch makes it retire.
fn build_version() -> &'static str {
    option_env!("EYE_BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

fn filter_for(verbose: u8) -> EnvFilter {
    match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Terminal logging on stderr, or a log file for the detached daemon.
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    if cli.daemon {
        let dir = logging::log_dir();
        if let Ok((writer, guard)) = logging::daemon_writer(&dir) {
            tracing_subscriber::fmt()
                .with_env_filter(filter_for(cli.verbose.max(1)))
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(cli.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    None
}

/// Upstream connector from the client configuration.
fn connector() -> Result<Arc<dyn Connector>> {
    match ConfigLoader::load_client() {
        Ok(settings) => {
            info!("Using server {}", settings.server);
            Ok(Arc::new(WebSocketConnector::new(settings.endpoint())))
        }
        Err(ConfigError::MissingToken) => {
            eprintln!("{}", ConsoleFormatter::missing_token());
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    if cli.daemon {
        return daemon::serve(connector()?).await;
    }
    if cli.status {
        return daemon::status().await;
    }
    if cli.kill {
        return daemon::kill().await;
    }
    if cli.mcp {
        return run_mcp(connector()?).await;
    }

    let expression = cli.expression();
    // Only an unreachable daemon falls back: once an expression has been
    // handed to the daemon, a failure is reported instead of resending it.
    if !cli.direct && daemon::try_run(expression.as_deref()).await? {
        return Ok(());
    }

    run_direct(connector()?, expression.as_deref()).await
}

async fn run_mcp(connector: Arc<dyn Connector>) -> Result<()> {
    let client = DirectClient::new(connector);
    let server = McpServer::new(Arc::clone(&client));
    info!("MCP bridge serving on stdio");
    server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    client.disconnect();
    Ok(())
}

async fn run_direct(connector: Arc<dyn Connector>, expression: Option<&str>) -> Result<()> {
    let client = DirectClient::new(connector);

    let Some(expression) = expression else {
        let (mut backend, frames) = DirectBackend::new(Arc::clone(&client));
        client.connect().await?;
        EvalRepl::new(false).run(&mut backend, frames).await?;
        client.disconnect();
        return Ok(());
    };

    client.connect().await?;
    let outcome = client.eval(expression).await;
    client.disconnect();

    print_reply(outcome?);
    Ok(())
}

/// Print a single-command reply; an error reply exits non-zero.
fn print_reply(reply: Option<Delivery>) {
    match reply {
        Some(delivery) if !delivery.is_success() => {
            eprintln!("{}", ConsoleFormatter::error(&delivery.payload));
            std::process::exit(1);
        }
        Some(delivery) => println!("{}", delivery.payload),
        None => {}
    }
}

#[cfg(unix)]
mod daemon {
    use super::{build_version, print_reply};
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use eye_application::{Connector, Delivery};
    use eye_domain::LocalResponse;
    use eye_infrastructure::daemon::{
        DaemonClient, DaemonError, DaemonExit, DaemonStatus, KillOutcome, RequestWriter,
        ResponseStream, run_daemon, socket_path,
    };
    use eye_presentation::{ConsoleFormatter, EvalRepl, ReplBackend};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing::info;

    fn client() -> DaemonClient {
        DaemonClient::new(socket_path(), build_version())
    }

    pub async fn serve(connector: Arc<dyn Connector>) -> Result<()> {
        match run_daemon(&socket_path(), build_version(), connector).await? {
            DaemonExit::Signalled => info!("Daemon stopped by signal"),
            DaemonExit::Requested(reason) => info!("Daemon stopped: {}", reason),
        }
        Ok(())
    }

    pub async fn status() -> Result<()> {
        let client = client();
        let text = match client.status().await {
            DaemonStatus::NotRunning { stale_socket } => {
                ConsoleFormatter::status_not_running(client.socket(), stale_socket)
            }
            DaemonStatus::Matching => {
                ConsoleFormatter::status_running("version match", client.socket())
            }
            DaemonStatus::Mismatched => ConsoleFormatter::status_running(
                "version mismatch, will restart",
                client.socket(),
            ),
            DaemonStatus::Unknown => {
                ConsoleFormatter::status_running("unknown state", client.socket())
            }
        };
        println!("{text}");
        Ok(())
    }

    pub async fn kill() -> Result<()> {
        let text = match client().kill().await {
            KillOutcome::NotRunning { removed_stale } => {
                ConsoleFormatter::kill_not_running(removed_stale)
            }
            KillOutcome::Killed => ConsoleFormatter::killed(),
        };
        println!("{text}");
        Ok(())
    }

    /// What became of a single expression offered to the daemon.
    #[derive(Debug)]
    pub enum DaemonEval {
        /// No daemon could be reached; nothing was sent.
        Unavailable,
        Answered(Option<Delivery>),
    }

    /// Evaluate through the daemon. Failures before the expression is sent
    /// are `Unavailable`; failures after it are errors.
    pub async fn eval_via(
        client: &DaemonClient,
        expression: &str,
    ) -> Result<DaemonEval, DaemonError> {
        let mut session = match client.connect().await {
            Ok(session) => session,
            Err(e) => {
                info!("No daemon: {}", e);
                return Ok(DaemonEval::Unavailable);
            }
        };
        session.eval(expression).await.map(DaemonEval::Answered)
    }

    /// Run through the daemon. `Ok(false)` means no daemon could be
    /// reached and the caller should connect directly.
    pub async fn try_run(expression: Option<&str>) -> Result<bool> {
        let mut client = client();
        match std::env::current_exe() {
            Ok(exe) => client = client.with_autostart(exe),
            Err(e) => info!("Cannot locate own binary, no autostart: {}", e),
        }

        let Some(expression) = expression else {
            let session = match client.connect().await {
                Ok(session) => session,
                Err(e) => {
                    info!("No daemon: {}", e);
                    return Ok(false);
                }
            };
            let (responses, requests) = session.into_split();
            let mut backend = DaemonBackend(requests);
            EvalRepl::new(true)
                .run(&mut backend, forward_responses(responses))
                .await?;
            return Ok(true);
        };

        match eval_via(&client, expression)
            .await
            .context("daemon session failed after the expression was sent")?
        {
            DaemonEval::Unavailable => Ok(false),
            DaemonEval::Answered(reply) => {
                print_reply(reply);
                Ok(true)
            }
        }
    }

    struct DaemonBackend(RequestWriter);

    #[async_trait]
    impl ReplBackend for DaemonBackend {
        async fn submit(&mut self, line: &str) -> Result<(), String> {
            self.0.eval(line).await.map_err(|e| e.to_string())
        }
    }

    fn forward_responses(mut responses: ResponseStream) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(response)) = responses.next().await {
                let line = match response {
                    LocalResponse::Result(payload) => payload,
                    LocalResponse::Error(payload) => format!("error: {payload}"),
                    LocalResponse::Broadcast(frame) => frame,
                    _ => continue,
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

#[cfg(not(unix))]
mod daemon {
    use anyhow::{Result, bail};
    use eye_application::Connector;
    use std::sync::Arc;

    pub async fn serve(_connector: Arc<dyn Connector>) -> Result<()> {
        bail!("the daemon needs unix domain sockets")
    }

    pub async fn status() -> Result<()> {
        bail!("the daemon needs unix domain sockets")
    }

    pub async fn kill() -> Result<()> {
        bail!("the daemon needs unix domain sockets")
    }

    pub async fn try_run(_expression: Option<&str>) -> Result<bool> {
        Ok(false)
    }
}
