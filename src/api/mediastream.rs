//! Media streaming endpoints: direct play with range, HLS transcode
//! playlists and segments, subtitles and attachments.

use std::path::PathBuf;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::auth::client_id;
use super::{ApiError, ApiResult, data};
use crate::app::AppState;
use crate::stream::transcode::{SegmentError, VideoQuality};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathQuery {
    path: String,
    #[serde(default)]
    client: Option<String>,
}

fn range_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Direct play: a range-capable view of a local file.
async fn direct(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
    Query(q): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let client = client_id(&jar, q.client.as_deref());
    let response = state
        .direct
        .serve_local(
            std::path::Path::new(&q.path),
            range_of(&headers).as_deref(),
            method == Method::HEAD,
            &client,
        )
        .await?;
    Ok(response)
}

/// Direct proxy over a remote URL (onlinestream/debrid sources).
#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: String,
    #[serde(default)]
    client: Option<String>,
}

async fn proxy(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
    Query(q): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let client = client_id(&jar, q.client.as_deref());
    let response = state
        .direct
        .proxy_remote(
            &q.url,
            range_of(&headers).as_deref(),
            method == Method::HEAD,
            &client,
            &Default::default(),
        )
        .await?;
    Ok(response)
}

fn require_transcode(enabled: bool) -> Result<(), ApiError> {
    if !enabled {
        return Err(anyhow::anyhow!("Transcoding is disabled").into());
    }
    Ok(())
}

async fn master_playlist(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(q): Query<PathQuery>,
) -> ApiResult {
    let settings = state.db.settings().get().await?;
    require_transcode(settings.media_stream.transcode_enabled)?;
    let client = client_id(&jar, q.client.as_deref());
    let playlist = state
        .transcoder
        .master_playlist(std::path::Path::new(&q.path), &client)
        .await?;
    Ok(m3u8_response(playlist))
}

async fn variant_playlist(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((_hash, quality)): Path<(String, String)>,
    Query(q): Query<PathQuery>,
) -> ApiResult {
    let quality =
        VideoQuality::parse(&quality).ok_or_else(|| anyhow::anyhow!("Unknown quality"))?;
    let client = client_id(&jar, q.client.as_deref());
    let playlist = state
        .transcoder
        .variant_playlist(std::path::Path::new(&q.path), &client, quality)
        .await?;
    Ok(m3u8_response(playlist))
}

async fn audio_playlist(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((_hash, audio)): Path<(String, usize)>,
    Query(q): Query<PathQuery>,
) -> ApiResult {
    let client = client_id(&jar, q.client.as_deref());
    let playlist = state
        .transcoder
        .audio_playlist(std::path::Path::new(&q.path), &client, audio)
        .await?;
    Ok(m3u8_response(playlist))
}

fn m3u8_response(playlist: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        playlist,
    )
        .into_response()
}

fn segment_error_response(e: SegmentError) -> Response {
    let status = match e {
        SegmentError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

async fn serve_segment_file(path: PathBuf) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "video/mp2t")],
            Body::from(bytes),
        )
            .into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "segment vanished").into_response(),
    }
}

async fn video_segment(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((_hash, quality, segment)): Path<(String, String, String)>,
    Query(q): Query<PathQuery>,
) -> Response {
    let Some(quality) = VideoQuality::parse(&quality) else {
        return (StatusCode::BAD_REQUEST, "unknown quality").into_response();
    };
    let Some(index) = parse_segment_name(&segment) else {
        return (StatusCode::BAD_REQUEST, "bad segment name").into_response();
    };
    let client = client_id(&jar, q.client.as_deref());
    match state
        .transcoder
        .video_segment(std::path::Path::new(&q.path), &client, quality, index)
        .await
    {
        Ok(path) => serve_segment_file(path).await,
        Err(e) => segment_error_response(e),
    }
}

async fn audio_segment(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((_hash, audio, segment)): Path<(String, usize, String)>,
    Query(q): Query<PathQuery>,
) -> Response {
    let Some(index) = parse_segment_name(&segment) else {
        return (StatusCode::BAD_REQUEST, "bad segment name").into_response();
    };
    let client = client_id(&jar, q.client.as_deref());
    match state
        .transcoder
        .audio_segment(std::path::Path::new(&q.path), &client, audio, index)
        .await
    {
        Ok(path) => serve_segment_file(path).await,
        Err(e) => segment_error_response(e),
    }
}

/// `segment-NNN.ts` → NNN
fn parse_segment_name(name: &str) -> Option<usize> {
    name.strip_prefix("segment-")?
        .strip_suffix(".ts")?
        .parse()
        .ok()
}

async fn subtitles(State(state): State<AppState>, Query(q): Query<PathQuery>) -> ApiResult {
    let extracted = state
        .transcoder
        .extract_subtitles(std::path::Path::new(&q.path))
        .await?;
    Ok(data(extracted))
}

async fn subtitle_file(
    State(state): State<AppState>,
    Path((hash, name)): Path<(String, String)>,
) -> Response {
    let Some(path) = state.transcoder.subtitle_path(&hash, &name) else {
        return (StatusCode::BAD_REQUEST, "bad subtitle name").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => Body::from(bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "subtitle not found").into_response(),
    }
}

async fn attachment_file(
    State(state): State<AppState>,
    Path((hash, name)): Path<(String, String)>,
) -> Response {
    let Some(path) = state.transcoder.attachment_path(&hash, &name) else {
        return (StatusCode::BAD_REQUEST, "bad attachment name").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => Body::from(bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "attachment not found").into_response(),
    }
}

async fn probe_info(State(state): State<AppState>, Query(q): Query<PathQuery>) -> ApiResult {
    let info = state
        .transcoder
        .media_info(std::path::Path::new(&q.path))
        .await?;
    Ok(data(info.as_ref()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mediastream/direct", any(direct))
        .route("/mediastream/proxy", any(proxy))
        .route("/mediastream/probe", get(probe_info))
        .route("/mediastream/transcode/master.m3u8", get(master_playlist))
        .route(
            "/mediastream/transcode/{hash}/{quality}/index.m3u8",
            get(variant_playlist),
        )
        .route(
            "/mediastream/transcode/{hash}/audio/{audio}/index.m3u8",
            get(audio_playlist),
        )
        .route(
            "/mediastream/transcode/{hash}/{quality}/{segment}",
            get(video_segment),
        )
        .route(
            "/mediastream/transcode/{hash}/audio/{audio}/{segment}",
            get(audio_segment),
        )
        .route("/mediastream/subtitles", post(subtitles))
        .route("/mediastream/subtitles/{hash}/{name}", get(subtitle_file))
        .route("/mediastream/attachments/{hash}/{name}", get(attachment_file))
}
