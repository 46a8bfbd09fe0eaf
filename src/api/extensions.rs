//! Extension endpoints: install/uninstall, grants, reloads and provider
//! invocation for manga/onlinestream/custom sources.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::extensions::manifest::ExtensionManifest;

async fn list(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.extensions.list_status().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    #[serde(default)]
    manifest_uri: String,
    #[serde(default)]
    manifest: Option<ExtensionManifest>,
}

async fn install(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<InstallRequest>,
) -> ApiResult {
    let status = if let Some(manifest) = body.manifest {
        state.extensions.install_manifest(manifest).await?
    } else if !body.manifest_uri.is_empty() {
        state.extensions.install(&body.manifest_uri).await?
    } else {
        return Err(anyhow::anyhow!("Provide a manifest or a manifest URI").into());
    };
    Ok(data(status))
}

async fn uninstall(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.extensions.uninstall(&id).await?;
    Ok(data(serde_json::json!({ "uninstalled": true })))
}

async fn grant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.extensions.grant(&id).await?;
    Ok(data(serde_json::json!({ "granted": true })))
}

async fn reload(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.extensions.reload(&id).await?;
    Ok(data(serde_json::json!({ "reloaded": true })))
}

#[derive(Debug, Deserialize)]
struct UserConfigRequest {
    config: serde_json::Value,
}

async fn set_user_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<UserConfigRequest>,
) -> ApiResult {
    state
        .db
        .extensions()
        .set_user_config(&id, &body.config.to_string())
        .await?;
    // New config takes effect on the next load.
    state.extensions.reload(&id).await?;
    Ok(data(serde_json::json!({ "saved": true })))
}

#[derive(Debug, Deserialize)]
struct ProviderQuery {
    #[serde(default)]
    query: String,
    #[serde(default)]
    id: String,
}

async fn manga_search(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .manga_provider(&ext)
        .ok_or_else(|| anyhow::anyhow!("Manga provider not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.search(&q.query).await {
        Ok(results) => Ok(data(results)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

async fn manga_chapters(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .manga_provider(&ext)
        .ok_or_else(|| anyhow::anyhow!("Manga provider not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.chapters(&q.id).await {
        Ok(results) => Ok(data(results)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

async fn manga_pages(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .manga_provider(&ext)
        .ok_or_else(|| anyhow::anyhow!("Manga provider not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.pages(&q.id).await {
        Ok(results) => Ok(data(results)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

async fn onlinestream_episodes(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .onlinestream_provider(&ext)
        .ok_or_else(|| anyhow::anyhow!("Onlinestream provider not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.episodes(&q.id).await {
        Ok(results) => Ok(data(results)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

async fn onlinestream_sources(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .onlinestream_provider(&ext)
        .ok_or_else(|| anyhow::anyhow!("Onlinestream provider not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.sources(&q.id).await {
        Ok(results) => Ok(data(results)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct CustomCallRequest {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

async fn custom_call(
    State(state): State<AppState>,
    Path(ext): Path<String>,
    axum::Json(body): axum::Json<CustomCallRequest>,
) -> ApiResult {
    let (loaded, provider) = state
        .extensions
        .custom_source(&ext)
        .ok_or_else(|| anyhow::anyhow!("Custom source not loaded: {ext}"))?;
    let _permit = loaded.semaphore.acquire().await.ok();
    match provider.call(&body.method, body.params).await {
        Ok(result) => Ok(data(result)),
        Err(e) => {
            loaded.record_failure();
            Err(e.into())
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/extensions", get(list))
        .route("/extensions/install", post(install))
        .route("/extensions/{id}/uninstall", post(uninstall))
        .route("/extensions/{id}/grant", post(grant))
        .route("/extensions/{id}/reload", post(reload))
        .route("/extensions/{id}/user-config", post(set_user_config))
        .route("/extensions/{id}/manga/search", get(manga_search))
        .route("/extensions/{id}/manga/chapters", get(manga_chapters))
        .route("/extensions/{id}/manga/pages", get(manga_pages))
        .route(
            "/extensions/{id}/onlinestream/episodes",
            get(onlinestream_episodes),
        )
        .route(
            "/extensions/{id}/onlinestream/sources",
            get(onlinestream_sources),
        )
        .route("/extensions/{id}/custom/call", post(custom_call))
}
