//! HTTP and WebSocket handlers of the relay server.

use super::socket::{next_text, split_socket};
use axum::Json;
use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use eye_application::content::{ContentBridge, ContentBridgeRegistry};
use eye_application::hub::{HubRegistry, UserHub};
use eye_application::ports::identity::IdentityVerifier;
use eye_application::ports::transport::FrameSink;
use eye_application::use_cases::tool_call::{ToolCallUseCase, ToolRequest};
use eye_domain::protocol::bridge::{BRIDGE_READY, NO_BRIDGE, READY};
use eye_domain::{RelayError, RoutingKey, Submission};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hubs: Arc<HubRegistry>,
    pub content: Arc<ContentBridgeRegistry>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub tools: Arc<ToolCallUseCase>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
    /// `ext=1` marks the browser extension on the content bridge.
    ext: Option<String>,
}

fn authenticate(verifier: &dyn IdentityVerifier, token: Option<&str>) -> Result<RoutingKey, Response> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Token required").into_response())?;
    verifier
        .verify(token)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Invalid token").into_response())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "bridges": state.hubs.bridged_users(),
        "extensions": state.content.connected_extensions(),
    }))
}

/// GET /api/eye: subscriber (eye client) socket.
pub async fn eye_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let key = match authenticate(state.verifier.as_ref(), query.token.as_deref()) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };
    let hub = state.hubs.hub(&key);
    ws.on_upgrade(move |socket| serve_subscriber(socket, hub))
}

async fn serve_subscriber(socket: WebSocket, hub: Arc<UserHub>) {
    let (sink, mut stream, writer) = split_socket(socket);
    let subscription = hub.register_subscriber(sink.clone());

    if !hub.has_primary() {
        debug!("Relay[{}]: eye client rejected, no bridge", hub.key());
        let _ = sink.send(NO_BRIDGE.to_string()).await;
        sink.close();
        drop(subscription);
        let _ = writer.await;
        return;
    }
    let _ = sink.send(READY.to_string()).await;

    while let Some(frame) = next_text(&mut stream).await {
        if frame.is_empty() {
            continue;
        }
        if let Err(e) = hub.relay_raw(&frame).await {
            let id = Submission::parse(&frame)
                .id()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let reason = match e {
                RelayError::NoBridgeConnected => e.to_string(),
                _ => "Browser disconnected".to_string(),
            };
            let _ = sink.send(format!("{id}!:{reason}")).await;
            break;
        }
    }

    drop(subscription);
    sink.close();
}

/// GET /api/eye-bridge: primary (browser) socket.
pub async fn bridge_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let key = match authenticate(state.verifier.as_ref(), query.token.as_deref()) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };
    let hub = state.hubs.hub(&key);
    ws.on_upgrade(move |socket| serve_bridge(socket, hub))
}

async fn serve_bridge(socket: WebSocket, hub: Arc<UserHub>) {
    let (sink, mut stream, _writer) = split_socket(socket);
    let primary = hub.register_primary(sink.clone());
    let _ = sink.send(BRIDGE_READY.to_string()).await;

    while let Some(frame) = next_text(&mut stream).await {
        if let Some(reply) = hub.handle_bridge_frame(&frame).await {
            let _ = sink.send(reply).await;
        }
    }

    info!("Relay[{}]: bridge socket closed", hub.key());
    drop(primary);
    sink.close();
}

/// GET /api/content-bridge: the browser extension (`ext=1`) or a page.
pub async fn content_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let key = match authenticate(state.verifier.as_ref(), query.token.as_deref()) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };
    let bridge = state.content.bridge(&key);
    if query.ext.as_deref() == Some("1") {
        ws.on_upgrade(move |socket| serve_extension(socket, bridge))
    } else {
        ws.on_upgrade(move |socket| serve_page(socket, bridge))
    }
}

async fn serve_extension(socket: WebSocket, bridge: Arc<ContentBridge>) {
    let (sink, mut stream, _writer) = split_socket(socket);
    let extension = bridge.register_extension(sink.clone());

    while let Some(frame) = next_text(&mut stream).await {
        bridge.handle_extension_frame(&frame);
    }

    info!("Relay[{}]: extension socket closed", bridge.key());
    drop(extension);
    sink.close();
}

async fn serve_page(socket: WebSocket, bridge: Arc<ContentBridge>) {
    let (sink, mut stream, _writer) = split_socket(socket);
    debug!("Relay[{}]: content page connected", bridge.key());

    while let Some(frame) = next_text(&mut stream).await {
        let bridge = Arc::clone(&bridge);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            if let Some(reply) = bridge.request(&frame).await {
                let _ = sink.send(reply).await;
            }
        });
    }

    debug!("Relay[{}]: content page closed", bridge.key());
    sink.close();
}

/// POST /api/mcp: structured tool calls, authenticated with a bearer token.
///
/// Every outcome is a 200 with a JSON body; failures carry `"error"`.
pub async fn tool_call(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    else {
        return Json(json!({
            "error": "Authorization required. Use: Authorization: Bearer <session_token>"
        }));
    };
    let Some(caller) = state.verifier.verify(token) else {
        return Json(json!({ "error": "Invalid or expired token" }));
    };
    let request: ToolRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return Json(json!({ "error": "Invalid request body" })),
    };

    debug!("Relay[{}]: tool endpoint {}", caller, request.method);
    Json(state.tools.execute(&caller, request).await)
}
