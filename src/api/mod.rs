//! HTTP API
//!
//! A versioned tree under `/api/v1` with one router per resource group and
//! a single `/events` WebSocket for server push. Responses use the
//! `{data}` / `{error}` envelope; the password gate rejects with a plain
//! `UNAUTHENTICATED` body and 401.

pub mod auth;
pub mod autodownloader;
pub mod continuity;
pub mod debrid;
pub mod events;
pub mod extensions;
pub mod library;
pub mod mediastream;
pub mod nakama;
pub mod playback;
pub mod playlists;
pub mod settings;
pub mod torrents;
pub mod torrentstream;

use axum::Router;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::app::AppState;

/// Error half of the response envelope. Any anyhow error maps to 500.
pub struct ApiError(pub anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

pub type ApiResult = Result<Response, ApiError>;

/// Success half of the envelope.
pub fn data<T: Serialize>(value: T) -> Response {
    axum::Json(serde_json::json!({ "data": value })).into_response()
}

/// 401 with the literal `UNAUTHENTICATED` body.
pub fn unauthenticated() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(Body::from("UNAUTHENTICATED"))
        .unwrap_or_default()
}

/// The full API router. Everything except the auth routes sits behind the
/// password gate middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(settings::router())
        .merge(library::router())
        .merge(autodownloader::router())
        .merge(torrents::router())
        .merge(torrentstream::router())
        .merge(mediastream::router())
        .merge(debrid::router())
        .merge(extensions::router())
        .merge(playback::router())
        .merge(playlists::router())
        .merge(continuity::router())
        .merge(events::router())
        .merge(nakama::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .merge(auth::router())
        .merge(nakama::peer_facing_router())
        .merge(protected)
}
