//! Password gate
//!
//! A single server password guards the API. Login mints a short session
//! token (JWT signed with a secret derived from the password) that clients
//! present as a bearer token; rotating the password invalidates every
//! token. An empty password disables the gate. The handler also assigns a
//! `Kanata-Client-Id` cookie so concurrent UI sessions can be told apart.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, data, unauthenticated};
use crate::app::AppState;

pub const CLIENT_ID_COOKIE: &str = "Kanata-Client-Id";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

fn secret_for(password: &str) -> Vec<u8> {
    // Tokens die with the password.
    format!("kanata-session:{password}").into_bytes()
}

fn mint_token(password: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: "kanata".to_string(),
        exp: (Utc::now() + chrono::Duration::days(30)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&secret_for(password)),
    )
}

fn verify_token(token: &str, password: &str) -> bool {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&secret_for(password)),
        &Validation::default(),
    )
    .is_ok()
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Middleware: reject unauthenticated requests with 401 `UNAUTHENTICATED`
/// and make sure a client id cookie exists.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let password = match state.db.settings().get().await {
        Ok(settings) => settings.password,
        Err(_) => return unauthenticated(),
    };

    if !password.is_empty() {
        let token = bearer_token(&request).or_else(|| {
            // The events WebSocket cannot set headers; it passes the token
            // as a query parameter.
            request.uri().query().and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == "token")
                    .map(|(_, v)| v.to_string())
            })
        });
        let authorized = token.map(|t| verify_token(&t, &password)).unwrap_or(false);
        if !authorized {
            return unauthenticated();
        }
    }

    let needs_cookie = jar.get(CLIENT_ID_COOKIE).is_none();
    let response = next.run(request).await;
    if needs_cookie {
        let cookie = Cookie::build((CLIENT_ID_COOKIE, uuid::Uuid::new_v4().to_string()))
            .path("/")
            .build();
        (jar.add(cookie), response).into_response()
    } else {
        response
    }
}

/// Client id for a request: cookie first, query fallback.
pub fn client_id(jar: &CookieJar, query_client: Option<&str>) -> String {
    jar.get(CLIENT_ID_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| query_client.map(|s| s.to_string()))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    password: String,
}

async fn login(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<LoginRequest>,
) -> ApiResult {
    let settings = state.db.settings().get().await?;
    if settings.password.is_empty() {
        return Ok(data(serde_json::json!({ "token": "" })));
    }
    if body.password != settings.password {
        return Ok(unauthenticated());
    }
    let token = mint_token(&settings.password).map_err(ApiError::from)?;
    Ok(data(serde_json::json!({ "token": token })))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let settings = state.db.settings().get().await?;
    Ok(data(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "passwordProtected": !settings.password.is_empty(),
        "libraryPaths": settings.library_paths,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/status", get(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let token = mint_token("hunter2").unwrap();
        assert!(verify_token(&token, "hunter2"));
        assert!(!verify_token(&token, "other-password"));
        assert!(!verify_token("garbage", "hunter2"));
    }
}
