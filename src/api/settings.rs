//! Settings endpoints: the runtime-mutable settings row.

use axum::Router;
use axum::extract::State;
use axum::routing::get;

use super::{ApiResult, data};
use crate::app::AppState;
use crate::config::Settings;

async fn get_settings(State(state): State<AppState>) -> ApiResult {
    let mut settings = state.db.settings().get().await?;
    // Secrets stay server-side.
    settings.password = String::new();
    settings.debrid.encrypted_api_key = String::new();
    settings.debrid.nonce = String::new();
    settings.anilist.token = String::new();
    Ok(data(settings))
}

async fn update_settings(
    State(state): State<AppState>,
    axum::Json(mut incoming): axum::Json<Settings>,
) -> ApiResult {
    let current = state.db.settings().get().await?;
    // Blank secret fields mean "keep the stored value".
    if incoming.password.is_empty() {
        incoming.password = current.password.clone();
    }
    if incoming.debrid.encrypted_api_key.is_empty() {
        incoming.debrid.encrypted_api_key = current.debrid.encrypted_api_key.clone();
        incoming.debrid.nonce = current.debrid.nonce.clone();
    }
    if incoming.anilist.token.is_empty() {
        incoming.anilist.token = current.anilist.token.clone();
    }
    for path in &incoming.library_paths {
        if !std::path::Path::new(path).is_absolute() {
            return Err(anyhow::anyhow!("Library paths must be absolute: {path}").into());
        }
    }
    state.db.settings().save(&incoming).await?;
    state.events.notify("success", "Settings updated");
    Ok(data(serde_json::json!({ "saved": true })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).post(update_settings))
}
