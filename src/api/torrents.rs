//! Torrent client endpoints: list/add/pause/resume/remove, provider search
//! and the smart-select protocol.

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::extensions::provider::SmartSearchOptions;
use crate::torrent::TorrentClient;

async fn list(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.torrent_client.list().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddRequest {
    magnets: Vec<String>,
    destination: String,
}

async fn add(State(state): State<AppState>, axum::Json(body): axum::Json<AddRequest>) -> ApiResult {
    if !std::path::Path::new(&body.destination).is_absolute() {
        return Err(anyhow::anyhow!("Destination must be an absolute path").into());
    }
    state
        .torrent_client
        .add_magnets(&body.magnets, std::path::Path::new(&body.destination))
        .await?;
    state.auto_scanner.notify();
    Ok(data(serde_json::json!({ "added": body.magnets.len() })))
}

#[derive(Debug, Deserialize)]
struct HashesRequest {
    hashes: Vec<String>,
    #[serde(default)]
    delete_files: bool,
}

async fn pause(State(state): State<AppState>, axum::Json(body): axum::Json<HashesRequest>) -> ApiResult {
    state.torrent_client.pause(&body.hashes).await?;
    Ok(data(serde_json::json!({ "paused": body.hashes.len() })))
}

async fn resume(State(state): State<AppState>, axum::Json(body): axum::Json<HashesRequest>) -> ApiResult {
    state.torrent_client.resume(&body.hashes).await?;
    Ok(data(serde_json::json!({ "resumed": body.hashes.len() })))
}

async fn remove(State(state): State<AppState>, axum::Json(body): axum::Json<HashesRequest>) -> ApiResult {
    state
        .torrent_client
        .remove(&body.hashes, body.delete_files)
        .await?;
    Ok(data(serde_json::json!({ "removed": body.hashes.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartSelectRequest {
    magnet: String,
    episode_numbers: Vec<i32>,
    destination: String,
}

async fn smart_select(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<SmartSelectRequest>,
) -> ApiResult {
    if !std::path::Path::new(&body.destination).is_absolute() {
        return Err(anyhow::anyhow!("Destination must be an absolute path").into());
    }
    let selection = state
        .torrent_client
        .smart_select(
            &body.magnet,
            &body.episode_numbers,
            std::path::Path::new(&body.destination),
        )
        .await?;
    state.auto_scanner.notify();
    Ok(data(selection))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    provider: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    media_id: Option<i64>,
    #[serde(default)]
    episode_number: Option<i32>,
}

/// Search a torrent provider extension.
async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .anime_torrent_provider(&q.provider)
        .ok_or_else(|| anyhow::anyhow!("Provider not loaded: {}", q.provider))?;
    let _permit = loaded.semaphore.acquire().await.ok();

    let result = if let Some(media_id) = q.media_id {
        let collection = state.platform.anime_collection(false).await?;
        let titles = collection
            .media(media_id)
            .map(|m| m.all_titles())
            .unwrap_or_default();
        provider
            .smart_search(&SmartSearchOptions {
                query: q.query.clone(),
                media_id,
                episode_number: q.episode_number,
                titles,
                ..Default::default()
            })
            .await
    } else {
        provider.search(&q.query).await
    };
    match result {
        Ok(torrents) => Ok(data(torrents)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/torrents", get(list))
        .route("/torrents/add", post(add))
        .route("/torrents/pause", post(pause))
        .route("/torrents/resume", post(resume))
        .route("/torrents/remove", post(remove))
        .route("/torrents/smart-select", post(smart_select))
        .route("/torrents/search", get(search))
}
