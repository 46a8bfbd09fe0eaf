//! Playlist endpoints.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::db::PlaylistRecord;

async fn list(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.db.playlists().list().await?))
}

async fn create(
    State(state): State<AppState>,
    axum::Json(playlist): axum::Json<PlaylistRecord>,
) -> ApiResult {
    let id = state.db.playlists().insert(&playlist).await?;
    Ok(data(serde_json::json!({ "id": id })))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    match state.db.playlists().get(id).await? {
        Some(playlist) => Ok(data(playlist)),
        None => Err(anyhow::anyhow!("Playlist not found").into()),
    }
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    axum::Json(mut playlist): axum::Json<PlaylistRecord>,
) -> ApiResult {
    playlist.id = id;
    state.db.playlists().update(&playlist).await?;
    Ok(data(serde_json::json!({ "updated": true })))
}

async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.db.playlists().delete(id).await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/playlists", get(list).post(create))
        .route("/playlists/{id}", get(get_one).post(update).delete(remove))
}
