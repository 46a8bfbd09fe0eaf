//! Direct stream
//!
//! Range-capable proxy over local files and foreign URLs. HEAD requests
//! return metadata only. The nakama hub tunnels peer streams through this
//! component so range semantics survive the hop, and external players use
//! it as a stable alternative to `file://` paths.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::range::{RangeError, content_type_for, parse_range};

/// Per-client playback session, used to surface activity in the UI.
#[derive(Debug, Clone)]
pub struct DirectSession {
    pub client_id: String,
    pub target: String,
    pub last_access: Instant,
}

#[derive(Clone)]
pub struct DirectStreamer {
    client: reqwest::Client,
    sessions: Arc<Mutex<HashMap<String, DirectSession>>>,
}

impl DirectStreamer {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn sessions(&self) -> Vec<DirectSession> {
        self.sessions.lock().values().cloned().collect()
    }

    fn track(&self, client_id: &str, target: &str) {
        if client_id.is_empty() {
            return;
        }
        self.sessions.lock().insert(
            client_id.to_string(),
            DirectSession {
                client_id: client_id.to_string(),
                target: target.to_string(),
                last_access: Instant::now(),
            },
        );
    }

    pub fn drop_session(&self, client_id: &str) {
        self.sessions.lock().remove(client_id);
    }

    /// Serve a local file honouring Range and HEAD.
    pub async fn serve_local(
        &self,
        path: &Path,
        range_header: Option<&str>,
        head_only: bool,
        client_id: &str,
    ) -> Result<Response> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            _ => return Ok(simple_response(StatusCode::NOT_FOUND, "file not found")),
        };
        let size = metadata.len();
        self.track(client_id, &path.to_string_lossy());

        let range = match parse_range(range_header, size) {
            Ok(r) => r,
            Err(RangeError::Unsatisfiable) => {
                return Ok(Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                    .body(Body::empty())?);
            }
        };

        let content_type = content_type_for(&path.to_string_lossy());
        let mut builder = Response::builder()
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, content_type);

        match range {
            Some(range) => {
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, range.content_range(size))
                    .header(header::CONTENT_LENGTH, range.len());
                if head_only {
                    return Ok(builder.body(Body::empty())?);
                }
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let stream = ReaderStream::new(file.take(range.len()));
                Ok(builder.body(Body::from_stream(stream))?)
            }
            None => {
                builder = builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, size);
                if head_only {
                    return Ok(builder.body(Body::empty())?);
                }
                let file = tokio::fs::File::open(path).await?;
                Ok(builder.body(Body::from_stream(ReaderStream::new(file)))?)
            }
        }
    }

    /// Proxy a remote URL, forwarding the Range header verbatim and
    /// passing the upstream's range response through.
    pub async fn proxy_remote(
        &self,
        url: &str,
        range_header: Option<&str>,
        head_only: bool,
        client_id: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Response> {
        self.track(client_id, url);

        let mut req = if head_only {
            self.client.head(url)
        } else {
            self.client.get(url)
        };
        if let Some(range) = range_header {
            req = req.header(header::RANGE, range);
        }
        for (k, v) in extra_headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let upstream = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(url = url, error = %e, "Upstream fetch failed");
                return Ok(simple_response(StatusCode::BAD_GATEWAY, "upstream unavailable"));
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = HeaderMap::new();
        for name in [
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ] {
            if let Some(value) = upstream.headers().get(&name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if !headers.contains_key(header::ACCEPT_RANGES) {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }

        let mut builder = Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            h.extend(headers);
        }
        if head_only {
            return Ok(builder.body(Body::empty())?);
        }
        Ok(builder.body(Body::from_stream(upstream.bytes_stream()))?)
    }
}

impl Default for DirectStreamer {
    fn default() -> Self {
        Self::new()
    }
}

fn simple_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn test_serve_local_range_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        let data: Vec<u8> = (0..=255u8).collect();
        std::fs::write(&path, &data).unwrap();

        let streamer = DirectStreamer::new();
        let resp = streamer
            .serve_local(&path, Some("bytes=10-19"), false, "client-1")
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 10-19/256"
        );
        assert_eq!(body_bytes(resp).await, data[10..=19].to_vec());
    }

    #[tokio::test]
    async fn test_serve_local_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mkv");
        std::fs::write(&path, b"hello world").unwrap();

        let streamer = DirectStreamer::new();
        let resp = streamer.serve_local(&path, None, false, "").await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/x-matroska"
        );
        assert_eq!(resp.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
        assert_eq!(body_bytes(resp).await, b"hello world");
    }

    #[tokio::test]
    async fn test_head_returns_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let streamer = DirectStreamer::new();
        let resp = streamer.serve_local(&path, None, true, "c").await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "64");
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, vec![0u8; 10]).unwrap();

        let streamer = DirectStreamer::new();
        let resp = streamer
            .serve_local(&path, Some("bytes=100-"), false, "")
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_session_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"x").unwrap();

        let streamer = DirectStreamer::new();
        streamer.serve_local(&path, None, true, "abc").await.unwrap();
        assert_eq!(streamer.sessions().len(), 1);
        streamer.drop_session("abc");
        assert!(streamer.sessions().is_empty());
    }
}
