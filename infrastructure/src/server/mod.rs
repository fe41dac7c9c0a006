//! Relay server: axum HTTP + WebSocket front of the correlation hub
//!
//! Routes:
//! - `GET /api/eye?token=`: eye clients (subscribers)
//! - `GET /api/eye-bridge?token=`: the browser tab (primary)
//! - `GET /api/content-bridge?token=[&ext=1]`: browser extension and pages
//! - `POST /api/mcp`: structured tool calls
//! - `GET /health`

pub mod identity;
mod routes;
pub mod socket;

pub use identity::StaticTokenVerifier;
pub use routes::AppState;

use axum::Router;
use axum::http::{Method, header};
use axum::routing::{get, post};
use eye_application::content::ContentBridgeRegistry;
use eye_application::hub::HubRegistry;
use eye_application::ports::identity::IdentityVerifier;
use eye_application::use_cases::tool_call::ToolCallUseCase;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// The relay server.
pub struct RelayServer {
    hubs: Arc<HubRegistry>,
    content: Arc<ContentBridgeRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    shutdown: CancellationToken,
}

impl RelayServer {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            hubs: Arc::new(HubRegistry::new()),
            content: Arc::new(ContentBridgeRegistry::new()),
            verifier,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hubs: Arc::clone(&self.hubs),
            content: Arc::clone(&self.content),
            verifier: Arc::clone(&self.verifier),
            tools: Arc::new(ToolCallUseCase::new(Arc::clone(&self.hubs))),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .route("/health", get(routes::health))
            .route("/api/eye", get(routes::eye_socket))
            .route("/api/eye-bridge", get(routes::bridge_socket))
            .route("/api/content-bridge", get(routes::content_socket))
            .route("/api/mcp", post(routes::tool_call))
            .layer(cors)
            .with_state(state)
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    pub fn content(&self) -> &Arc<ContentBridgeRegistry> {
        &self.content
    }

    /// Token that stops [`serve`](Self::serve) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        if let Some(addr) = local {
            info!("Relay listening on {}", addr);
        }
        let token = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        info!("Relay stopped");
        Ok(())
    }
}
