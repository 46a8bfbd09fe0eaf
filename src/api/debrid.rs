//! Debrid endpoints: credentials, add/poll/stream/cancel/delete.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::debrid::provider_from_settings;

async fn provider(state: &AppState) -> Result<std::sync::Arc<dyn crate::debrid::DebridProvider>, anyhow::Error> {
    let settings = state.db.settings().get().await?;
    provider_from_settings(&settings, &state.vault)?
        .ok_or_else(|| anyhow::anyhow!("Debrid is not configured"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest {
    provider: String,
    api_key: String,
    enabled: bool,
}

/// Store the API key encrypted at rest.
async fn set_credentials(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CredentialsRequest>,
) -> ApiResult {
    let (ciphertext, nonce) = state.vault.encrypt(&body.api_key)?;
    let mut settings = state.db.settings().get().await?;
    settings.debrid.provider = body.provider;
    settings.debrid.enabled = body.enabled;
    settings.debrid.encrypted_api_key = ciphertext;
    settings.debrid.nonce = nonce;
    state.db.settings().save(&settings).await?;
    Ok(data(serde_json::json!({ "saved": true })))
}

async fn list(State(state): State<AppState>) -> ApiResult {
    let provider = provider(&state).await?;
    Ok(data(provider.list().await?))
}

#[derive(Debug, Deserialize)]
struct AddRequest {
    magnet: String,
}

async fn add(State(state): State<AppState>, axum::Json(body): axum::Json<AddRequest>) -> ApiResult {
    let provider = provider(&state).await?;
    let item_id = provider.add_torrent(&body.magnet).await?;
    Ok(data(serde_json::json!({ "itemId": item_id })))
}

async fn info(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let provider = provider(&state).await?;
    Ok(data(provider.get_info(&id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamUrlRequest {
    item_id: String,
    file_id: String,
}

async fn stream_url(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<StreamUrlRequest>,
) -> ApiResult {
    let provider = provider(&state).await?;
    let url = provider.stream_url(&body.item_id, &body.file_id).await?;
    Ok(data(serde_json::json!({ "url": url })))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let provider = provider(&state).await?;
    provider.cancel(&id).await?;
    Ok(data(serde_json::json!({ "cancelled": true })))
}

async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let provider = provider(&state).await?;
    provider.delete(&id).await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/debrid/credentials", post(set_credentials))
        .route("/debrid/torrents", get(list).post(add))
        .route("/debrid/torrents/{id}", get(info).delete(remove))
        .route("/debrid/torrents/{id}/cancel", post(cancel))
        .route("/debrid/stream-url", post(stream_url))
}
