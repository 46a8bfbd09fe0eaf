//! Torrent-stream endpoints: start/stop the single session and the range
//! endpoint the player reads from.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, header};
use axum::response::Response;
use axum::routing::{any, get, post};

use super::{ApiResult, data};
use crate::app::AppState;
use crate::stream::StartStreamOptions;

async fn start(
    State(state): State<AppState>,
    axum::Json(opts): axum::Json<StartStreamOptions>,
) -> ApiResult {
    let settings = state.db.settings().get().await?;
    if !settings.torrent_stream.enabled {
        return Err(anyhow::anyhow!("Torrent streaming is disabled").into());
    }
    let status = state.torrent_streamer.start(opts).await?;
    Ok(data(status))
}

async fn stop(State(state): State<AppState>) -> ApiResult {
    let settings = state.db.settings().get().await?;
    state
        .torrent_streamer
        .stop(settings.torrent_stream.drop_threshold)
        .await?;
    Ok(data(serde_json::json!({ "stopped": true })))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.torrent_streamer.status().await))
}

/// Range endpoint; GET and HEAD share the handler.
async fn stream(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, super::ApiError> {
    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let response = state
        .torrent_streamer
        .serve_range(range.as_deref(), method == Method::HEAD)
        .await?;
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/torrentstream/start", post(start))
        .route("/torrentstream/stop", post(stop))
        .route("/torrentstream/status", get(status))
        .route("/torrentstream/stream", any(stream))
}
