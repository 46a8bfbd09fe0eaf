//! Nakama endpoints
//!
//! The peer-facing surface (`/nakama/ws`, `/nakama/stream`) authenticates
//! with the shared host password rather than the server session token. The
//! rest of the group drives the local peer role and the watch party.

use std::collections::HashMap;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use serde::Deserialize;

use super::{ApiError, ApiResult, data, unauthenticated};
use crate::app::AppState;
use crate::nakama::WatchPartySettings;

#[derive(Debug, Deserialize)]
struct PeerAuthQuery {
    #[serde(default)]
    password: String,
    #[serde(default)]
    path: String,
}

/// Peer WebSocket endpoint. Socket-level auth happens in the handshake
/// message; the upgrade itself is open.
async fn peer_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        state.nakama.host.handle_socket(socket).await;
    })
}

/// Authenticated stream proxy for peers: serves host-local files with full
/// range semantics. Rejects with 401 and performs no work otherwise.
async fn peer_stream(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(q): Query<PeerAuthQuery>,
) -> Result<Response, ApiError> {
    let password = headers
        .get("x-nakama-password")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or(q.password.clone());
    if !state.nakama.host.check_password(&password).await {
        return Ok(unauthenticated());
    }

    // Only files the library knows about are shareable.
    let files = state.store.get();
    let known = files.iter().any(|lf| lf.path == q.path);
    if !known {
        return Err(anyhow::anyhow!("Unknown file").into());
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let response = state
        .direct
        .serve_local(
            std::path::Path::new(&q.path),
            range.as_deref(),
            method == Method::HEAD,
            "nakama-peer",
        )
        .await?;
    Ok(response)
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let peers = state.nakama.host.connected_peers();
    let peer_state = state
        .nakama
        .peer()
        .map(|p| format!("{:?}", p.state()))
        .unwrap_or_else(|| "Disconnected".to_string());
    Ok(data(serde_json::json!({
        "peers": peers.iter().map(|(id, name)| serde_json::json!({ "peerId": id, "username": name })).collect::<Vec<_>>(),
        "peerConnection": peer_state,
        "watchParty": state.nakama.host.watch_party.session(),
    })))
}

async fn connect(State(state): State<AppState>) -> ApiResult {
    state.nakama.connect_peer().await?;
    Ok(data(serde_json::json!({ "connecting": true })))
}

/// The host library as seen from the peer role.
async fn host_library(State(state): State<AppState>) -> ApiResult {
    let peer = state
        .nakama
        .peer()
        .ok_or_else(|| anyhow::anyhow!("Not connected to a host"))?;
    Ok(data(peer.library_snapshot().await?))
}

#[derive(Debug, Deserialize)]
struct StreamUrlRequest {
    path: String,
}

/// Resolve a host file into a locally proxyable URL.
async fn host_stream_url(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<StreamUrlRequest>,
) -> ApiResult {
    let peer = state
        .nakama
        .peer()
        .ok_or_else(|| anyhow::anyhow!("Not connected to a host"))?;
    let url = peer.stream_url(&body.path).await?;
    Ok(data(serde_json::json!({ "url": url })))
}

/// Tunnel a host stream through this instance, preserving ranges.
#[derive(Debug, Deserialize)]
struct TunnelQuery {
    url: String,
}

async fn tunnel(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(q): Query<TunnelQuery>,
) -> Result<Response, ApiError> {
    let settings = state.db.settings().get().await?;
    let base = settings.nakama.remote_url.replace("ws://", "http://").replace("wss://", "https://");
    let full = format!("{}{}", base.trim_end_matches('/'), q.url);
    let mut extra = HashMap::new();
    extra.insert(
        "x-nakama-password".to_string(),
        settings.nakama.remote_password.clone(),
    );
    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let response = state
        .direct
        .proxy_remote(
            &full,
            range.as_deref(),
            method == Method::HEAD,
            "nakama-tunnel",
            &extra,
        )
        .await?;
    Ok(response)
}

async fn create_watch_party(
    State(state): State<AppState>,
    body: Option<axum::Json<WatchPartySettings>>,
) -> ApiResult {
    let settings = body.map(|b| b.0).unwrap_or_default();
    let session = state.nakama.host.create_watch_party(settings).await;
    Ok(data(session))
}

async fn stop_watch_party(State(state): State<AppState>) -> ApiResult {
    state.nakama.host.watch_party.stop();
    state.nakama.host.broadcast(crate::nakama::Envelope::new(
        crate::nakama::MessageType::WatchPartyStopped,
        serde_json::Value::Null,
    ));
    Ok(data(serde_json::json!({ "stopped": true })))
}

async fn join_watch_party(State(state): State<AppState>) -> ApiResult {
    let peer = state
        .nakama
        .peer()
        .ok_or_else(|| anyhow::anyhow!("Not connected to a host"))?;
    peer.join_watch_party().await?;
    Ok(data(serde_json::json!({ "joined": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackRelayRequest {
    position: f64,
    paused: bool,
    #[serde(default)]
    seek: bool,
}

/// Host playback relay: play/pause status, seeks as their own event.
async fn relay_playback(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<PlaybackRelayRequest>,
) -> ApiResult {
    state
        .nakama
        .host
        .relay_playback(body.position, body.paused, body.seek);
    Ok(data(serde_json::json!({ "relayed": true })))
}

/// Routes peers reach without the local session token.
pub fn peer_facing_router() -> Router<AppState> {
    Router::new()
        .route("/nakama/ws", get(peer_ws))
        .route("/nakama/stream", any(peer_stream))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/nakama/status", get(status))
        .route("/nakama/connect", post(connect))
        .route("/nakama/host/library", get(host_library))
        .route("/nakama/host/stream-url", post(host_stream_url))
        .route("/nakama/tunnel", any(tunnel))
        .route(
            "/nakama/watch-party/create",
            post(create_watch_party),
        )
        .route("/nakama/watch-party/stop", post(stop_watch_party))
        .route("/nakama/watch-party/join", post(join_watch_party))
        .route("/nakama/watch-party/playback", post(relay_playback))
}
