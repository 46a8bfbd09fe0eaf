//! Playback endpoints: current slot, progress updates, lifecycle.

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::playback::StartPlaybackOptions;

async fn current(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.playback.current()))
}

async fn start(
    State(state): State<AppState>,
    axum::Json(opts): axum::Json<StartPlaybackOptions>,
) -> ApiResult {
    Ok(data(state.playback.start(opts)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRequest {
    current_time: f64,
    duration: f64,
}

/// Manual tracking and media-player events both land here.
async fn progress(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ProgressRequest>,
) -> ApiResult {
    state
        .playback
        .progress(body.current_time, body.duration)
        .await?;
    Ok(data(serde_json::json!({ "tracked": true })))
}

async fn ended(State(state): State<AppState>) -> ApiResult {
    let next = state.playback.ended().await?;
    Ok(data(serde_json::json!({ "next": next })))
}

async fn cancel(State(state): State<AppState>) -> ApiResult {
    state.playback.cancelled();
    Ok(data(serde_json::json!({ "cancelled": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/playback/current", get(current))
        .route("/playback/start", post(start))
        .route("/playback/progress", post(progress))
        .route("/playback/ended", post(ended))
        .route("/playback/cancel", post(cancel))
}
