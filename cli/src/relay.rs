//! Relay server entrypoint
//!
//! Pairs eye clients with their browser bridge and serves the structured
//! tool-call endpoint.

use anyhow::Result;
use clap::Parser;
use eye_infrastructure::{ConfigLoader, RelayServer, StaticTokenVerifier};
use eye_presentation::RelayCli;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RelayCli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = ConfigLoader::load_relay(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let verifier = StaticTokenVerifier::new(config.tokens);
    info!("Loaded {} session token(s)", verifier.len());

    let server = RelayServer::new(Arc::new(verifier));
    let listener = RelayServer::bind(&config.bind).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutting down");
        shutdown.cancel();
    });

    server.serve(listener).await?;
    Ok(())
}
