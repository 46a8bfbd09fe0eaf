//! Continuity endpoints: per-media resume points.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::library::WatchHistoryKind;

async fn list(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.continuity.list()))
}

async fn get_one(State(state): State<AppState>, Path(media_id): Path<i64>) -> ApiResult {
    Ok(data(state.continuity.get(media_id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    media_id: i64,
    kind: WatchHistoryKind,
    #[serde(default)]
    file_path: String,
    episode: i32,
    current_time: f64,
    duration: f64,
}

async fn update(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<UpdateRequest>,
) -> ApiResult {
    state.continuity.update(
        body.media_id,
        body.kind,
        &body.file_path,
        body.episode,
        body.current_time,
        body.duration,
    );
    Ok(data(serde_json::json!({ "saved": true })))
}

async fn remove(State(state): State<AppState>, Path(media_id): Path<i64>) -> ApiResult {
    state.continuity.remove(media_id);
    Ok(data(serde_json::json!({ "removed": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/continuity", get(list).post(update))
        .route("/continuity/{media_id}", get(get_one))
        .route("/continuity/{media_id}/remove", delete(remove).post(remove))
}
