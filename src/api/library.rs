//! Anime library endpoints: entries, local files, scans, bulk actions.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::library::{BulkOp, LocalFilePatch, build_entries, build_entry, unmatched_files};
use crate::scanner::summary::ScanSummary;

async fn get_entries(State(state): State<AppState>) -> ApiResult {
    let files = state.store.get();
    let collection = state.platform.anime_collection(false).await?;
    Ok(data(build_entries(&files, &collection)))
}

async fn get_entry(State(state): State<AppState>, Path(media_id): Path<i64>) -> ApiResult {
    let files = state.store.get();
    let collection = state.platform.anime_collection(false).await?;
    Ok(data(build_entry(media_id, &files, &collection)))
}

async fn get_local_files(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.store.get().as_ref()))
}

async fn get_unmatched(State(state): State<AppState>) -> ApiResult {
    let files = state.store.get();
    Ok(data(unmatched_files(&files)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest {
    #[serde(default)]
    force: bool,
}

async fn scan(State(state): State<AppState>, body: Option<axum::Json<ScanRequest>>) -> ApiResult {
    let _force = body.map(|b| b.force).unwrap_or(false);
    let (roots, opts) = state.scanner.options_from_settings().await?;
    if roots.is_empty() {
        return Err(anyhow::anyhow!("No library paths configured").into());
    }
    let result = state.scanner.scan(&roots, &opts).await?;
    Ok(data(serde_json::json!({
        "summaryId": result.summary_id,
        "totalFiles": result.total_files,
        "matchedFiles": result.matched_files,
        "unmatchedFiles": result.unmatched_files,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    op: BulkOp,
    media_id: i64,
}

async fn bulk(State(state): State<AppState>, axum::Json(body): axum::Json<BulkRequest>) -> ApiResult {
    let touched = state.store.bulk(body.op, body.media_id).await?;
    Ok(data(serde_json::json!({ "touched": touched })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateFileRequest {
    path: String,
    #[serde(flatten)]
    patch: LocalFilePatch,
}

async fn update_file(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<UpdateFileRequest>,
) -> ApiResult {
    let found = state.store.update_one(&body.path, body.patch).await?;
    if !found {
        return Err(anyhow::anyhow!("File not found: {}", body.path).into());
    }
    Ok(data(serde_json::json!({ "updated": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveMissingRequest {
    paths: Vec<String>,
}

/// Rows for vanished files are only dropped on explicit confirmation.
async fn remove_missing(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<RemoveMissingRequest>,
) -> ApiResult {
    let removed = state.store.remove_missing(&body.paths).await?;
    Ok(data(serde_json::json!({ "removed": removed })))
}

async fn get_scan_summary(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let summary: Option<ScanSummary> = state.db.scan_summaries().get(id).await?;
    if summary.is_none() {
        return Err(anyhow::anyhow!("Scan summary not found").into());
    }
    Ok(data(summary))
}

async fn recent_scan_summaries(State(state): State<AppState>) -> ApiResult {
    let summaries: Vec<(i64, ScanSummary)> = state.db.scan_summaries().recent(10).await?;
    Ok(data(summaries))
}

async fn refresh_collection(State(state): State<AppState>) -> ApiResult {
    let collection = state.platform.anime_collection(true).await?;
    Ok(data(serde_json::json!({ "entries": collection.entries.len() })))
}

async fn list_silenced(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.db.silenced().list().await?))
}

/// Silence missing-episode notifications for a media id.
async fn silence(State(state): State<AppState>, Path(media_id): Path<i64>) -> ApiResult {
    state.db.silenced().add(media_id).await?;
    Ok(data(serde_json::json!({ "silenced": true })))
}

async fn unsilence(State(state): State<AppState>, Path(media_id): Path<i64>) -> ApiResult {
    state.db.silenced().remove(media_id).await?;
    Ok(data(serde_json::json!({ "silenced": false })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillerRequest {
    title: String,
    episodes: Vec<i32>,
}

/// Filler data is fetched by clients/extensions and cached server-side.
async fn set_filler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<FillerRequest>,
) -> ApiResult {
    state.metadata.set_filler_data(&body.title, &body.episodes);
    Ok(data(serde_json::json!({ "saved": true })))
}

#[derive(Debug, Deserialize)]
struct FillerQuery {
    titles: String,
}

async fn get_filler(
    State(state): State<AppState>,
    axum::extract::Query(q): axum::extract::Query<FillerQuery>,
) -> ApiResult {
    let titles: Vec<String> = q.titles.split(',').map(|s| s.trim().to_string()).collect();
    Ok(data(state.metadata.filler_data(&titles).await))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/library/entries", get(get_entries))
        .route("/library/entries/{media_id}", get(get_entry))
        .route("/library/files", get(get_local_files))
        .route("/library/files/unmatched", get(get_unmatched))
        .route("/library/files/update", post(update_file))
        .route("/library/files/remove-missing", post(remove_missing))
        .route("/library/bulk", post(bulk))
        .route("/library/scan", post(scan))
        .route("/library/scan-summaries", get(recent_scan_summaries))
        .route("/library/scan-summaries/{id}", get(get_scan_summary))
        .route("/library/refresh-collection", post(refresh_collection))
        .route("/library/silenced", get(list_silenced))
        .route("/library/silenced/{media_id}", post(silence).delete(unsilence))
        .route("/library/filler", get(get_filler).post(set_filler))
}
