//! Auto-downloader endpoints: rules CRUD, queue items, manual runs.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};

use super::{ApiResult, data};
use crate::app::AppState;
use crate::db::Rule;

async fn list_rules(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.db.rules().list().await?))
}

async fn create_rule(State(state): State<AppState>, axum::Json(rule): axum::Json<Rule>) -> ApiResult {
    let id = state.db.rules().insert(&rule).await?;
    Ok(data(serde_json::json!({ "id": id })))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    axum::Json(mut rule): axum::Json<Rule>,
) -> ApiResult {
    rule.db_id = id;
    state.db.rules().update(&rule).await?;
    Ok(data(serde_json::json!({ "updated": true })))
}

async fn delete_rule(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.db.rules().delete(id).await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

async fn list_items(State(state): State<AppState>) -> ApiResult {
    Ok(data(state.db.items().list().await?))
}

async fn delete_item(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state
        .db
        .items()
        .set_state(id, crate::db::ItemState::Removed)
        .await?;
    Ok(data(serde_json::json!({ "removed": true })))
}

/// On-demand run; overlapping runs are rejected by the engine.
async fn run_now(State(state): State<AppState>) -> ApiResult {
    let queued = state.auto_downloader.run().await?;
    Ok(data(serde_json::json!({ "queued": queued })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/autodownloader/rules", get(list_rules).post(create_rule))
        .route(
            "/autodownloader/rules/{id}",
            post(update_rule).delete(delete_rule),
        )
        .route("/autodownloader/items", get(list_items))
        .route("/autodownloader/items/{id}", delete(delete_item))
        .route("/autodownloader/run", post(run_now))
}
