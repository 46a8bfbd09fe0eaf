//! Torrent-stream core
//!
//! A single active streaming attachment at a time, on its own librqbit
//! session rooted at the configured download root. Range reads go through
//! the engine's file stream, which blocks until the backing pieces are
//! ready; the wait is bounded per request and a timeout maps to HTTP 504
//! without killing the session. Repeated timeouts downgrade the session to
//! "stalled" and emit an event. On stop the torrent is dropped (data
//! deleted) below the completion threshold, detached otherwise.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use super::range::{RangeError, content_type_for, parse_range};
use crate::events::{EventBus, WsEvent};
use crate::parser;

/// How long one range request may wait for its first readable bytes.
const PIECE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeouts in a row before the session is flagged stalled.
const STALL_THRESHOLD: u32 = 3;
/// How long to wait for torrent metadata on start.
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamOptions {
    pub media_id: i64,
    pub episode: i32,
    /// Magnet link, torrent URL or file path
    pub torrent: String,
    /// Explicit file index; None enables auto-select
    #[serde(default)]
    pub file_index: Option<usize>,
    #[serde(default)]
    pub auto_select: bool,
    /// "default" | "external-player" ...
    #[serde(default)]
    pub playback_type: String,
}

struct ActiveStream {
    id: usize,
    handle: Arc<ManagedTorrent>,
    file_index: usize,
    file_size: u64,
    file_name: String,
    media_id: i64,
    episode: i32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentStreamStatus {
    pub media_id: i64,
    pub episode: i32,
    pub file_name: String,
    pub progress: f64,
    pub download_speed: u64,
    pub seeders: u64,
    pub stalled: bool,
}

pub struct TorrentStreamer {
    download_dir: PathBuf,
    events: EventBus,
    session: Mutex<Option<Arc<Session>>>,
    current: Mutex<Option<ActiveStream>>,
    consecutive_timeouts: AtomicU32,
}

impl TorrentStreamer {
    pub fn new(download_dir: PathBuf, events: EventBus) -> Self {
        Self {
            download_dir,
            events,
            session: Mutex::new(None),
            current: Mutex::new(None),
            consecutive_timeouts: AtomicU32::new(0),
        }
    }

    async fn session(&self) -> Result<Arc<Session>> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        tokio::fs::create_dir_all(&self.download_dir).await.ok();
        let session = Session::new_with_opts(
            self.download_dir.clone(),
            SessionOptions {
                // Streaming attachments are ephemeral; nothing to restore.
                persistence: None,
                ..Default::default()
            },
        )
        .await
        .context("Failed to create streaming torrent session")?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Attach a torrent and select the file to stream. Any previous
    /// attachment is dropped first (single active session).
    pub async fn start(&self, opts: StartStreamOptions) -> Result<TorrentStreamStatus> {
        self.stop_internal(true).await?;
        self.events.send(WsEvent::TorrentStreamLoading);

        let session = self.session().await?;
        let response = session
            .add_torrent(
                AddTorrent::from_url(&opts.torrent),
                Some(AddTorrentOptions {
                    overwrite: true,
                    ..Default::default()
                }),
            )
            .await
            .context("Failed to attach torrent")?;
        let (id, handle) = match response {
            AddTorrentResponse::Added(id, handle) => (id, handle),
            AddTorrentResponse::AlreadyManaged(id, handle) => (id, handle),
            AddTorrentResponse::ListOnly(_) => anyhow::bail!("Unexpected list-only response"),
        };

        tokio::time::timeout(INIT_TIMEOUT, handle.wait_until_initialized())
            .await
            .context("Timed out waiting for torrent metadata")?
            .context("Torrent failed to initialize")?;

        let metadata = handle
            .metadata
            .load_full()
            .context("Torrent has no metadata")?;
        let files: Vec<(usize, String, u64)> = metadata
            .file_infos
            .iter()
            .enumerate()
            .map(|(i, f)| (i, f.relative_filename.to_string_lossy().to_string(), f.len))
            .collect();

        let file_index = match opts.file_index {
            Some(index) => {
                anyhow::ensure!(index < files.len(), "File index out of range");
                index
            }
            None => auto_select_file(&files, opts.episode)
                .context("No file matches the requested episode")?,
        };
        let (_, file_name, file_size) = files[file_index].clone();

        // Deselect everything else; the engine prioritises the head of the
        // selected file and follows the read cursor from there.
        let only: std::collections::HashSet<usize> = [file_index].into_iter().collect();
        session
            .update_only_files(&handle, &only)
            .await
            .context("Failed to select stream file")?;

        tracing::info!(
            media_id = opts.media_id,
            episode = opts.episode,
            file = %file_name,
            "Torrent stream started"
        );

        let status = TorrentStreamStatus {
            media_id: opts.media_id,
            episode: opts.episode,
            file_name: file_name.clone(),
            progress: 0.0,
            download_speed: 0,
            seeders: 0,
            stalled: false,
        };

        *self.current.lock().await = Some(ActiveStream {
            id,
            handle,
            file_index,
            file_size,
            file_name,
            media_id: opts.media_id,
            episode: opts.episode,
        });
        self.consecutive_timeouts.store(0, Ordering::Relaxed);
        self.events.send(WsEvent::TorrentStreamReady {
            stream_url: "/api/v1/torrentstream/stream".to_string(),
        });
        Ok(status)
    }

    /// Current status, if a stream is active.
    pub async fn status(&self) -> Option<TorrentStreamStatus> {
        let guard = self.current.lock().await;
        let active = guard.as_ref()?;
        let stats = active.handle.stats();
        let progress = stats.progress_bytes as f64 / stats.total_bytes.max(1) as f64 * 100.0;
        let (download_speed, seeders) = stats
            .live
            .as_ref()
            .map(|l| {
                (
                    (l.download_speed.mbps * 125_000.0) as u64,
                    l.snapshot.peer_stats.live as u64,
                )
            })
            .unwrap_or((0, 0));
        let status = TorrentStreamStatus {
            media_id: active.media_id,
            episode: active.episode,
            file_name: active.file_name.clone(),
            progress,
            download_speed,
            seeders,
            stalled: self.consecutive_timeouts.load(Ordering::Relaxed) >= STALL_THRESHOLD,
        };
        self.events
            .send(WsEvent::TorrentStreamStatus(serde_json::to_value(&status).ok().unwrap_or_default()));
        Some(status)
    }

    /// Serve a range request from the active stream. The first read blocks
    /// on piece readiness with a bounded wait; within one request returned
    /// bytes are strictly monotonic in offset.
    pub async fn serve_range(&self, range_header: Option<&str>, head_only: bool) -> Result<Response> {
        let (handle, file_index, file_size, file_name) = {
            let guard = self.current.lock().await;
            let Some(active) = guard.as_ref() else {
                return Ok(Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("no active torrent stream"))?);
            };
            (
                active.handle.clone(),
                active.file_index,
                active.file_size,
                active.file_name.clone(),
            )
        };

        let range = match parse_range(range_header, file_size) {
            Ok(r) => r,
            Err(RangeError::Unsatisfiable) => {
                return Ok(Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
                    .body(Body::empty())?);
            }
        };

        let (start, len, status, content_range) = match range {
            Some(r) => (
                r.start,
                r.len(),
                StatusCode::PARTIAL_CONTENT,
                Some(r.content_range(file_size)),
            ),
            None => (0, file_size, StatusCode::OK, None),
        };

        let mut builder = Response::builder()
            .status(status)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, content_type_for(&file_name))
            .header(header::CONTENT_LENGTH, len);
        if let Some(content_range) = content_range {
            builder = builder.header(header::CONTENT_RANGE, content_range);
        }
        if head_only {
            return Ok(builder.body(Body::empty())?);
        }

        // Out-of-order seeks move the engine's priority window: the stream
        // prioritises pieces at its read position.
        let mut stream = handle
            .stream(file_index)
            .context("Failed to open torrent file stream")?;
        stream
            .seek(SeekFrom::Start(start))
            .await
            .context("Seek failed")?;

        // The first chunk carries the piece wait; bound it so a dead swarm
        // turns into 504 instead of a hung request.
        let first_len = (64 * 1024).min(len as usize).max(1);
        let mut first = vec![0u8; first_len];
        let read = tokio::time::timeout(PIECE_WAIT_TIMEOUT, stream.read(&mut first)).await;
        let n = match read {
            Ok(Ok(n)) => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                n
            }
            Ok(Err(e)) => {
                return Err(anyhow::anyhow!("Stream read failed: {e}"));
            }
            Err(_) => {
                let timeouts = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(timeouts = timeouts, "Piece wait timed out");
                if timeouts >= STALL_THRESHOLD {
                    self.events.send(WsEvent::TorrentStreamStalled);
                }
                return Ok(Response::builder()
                    .status(StatusCode::GATEWAY_TIMEOUT)
                    .body(Body::from("piece wait timed out"))?);
            }
        };
        first.truncate(n);

        use futures::StreamExt;
        let remaining = len.saturating_sub(n as u64);
        let first_stream = futures::stream::once(async move {
            Ok::<_, std::io::Error>(bytes::Bytes::from(first))
        });
        let rest = ReaderStream::new(stream.take(remaining));
        let body = Body::from_stream(first_stream.chain(rest));
        Ok(builder.body(body)?)
    }

    /// Stop the active stream: below the completion threshold the data is
    /// dropped, otherwise the torrent is detached and kept on disk.
    pub async fn stop(&self, drop_threshold: f64) -> Result<()> {
        self.stop_with_threshold(drop_threshold).await
    }

    async fn stop_with_threshold(&self, drop_threshold: f64) -> Result<()> {
        let Some(active) = self.current.lock().await.take() else {
            return Ok(());
        };
        let stats = active.handle.stats();
        let completion = stats.progress_bytes as f64 / stats.total_bytes.max(1) as f64 * 100.0;
        let drop_data = completion < drop_threshold;

        let session = self.session().await?;
        session
            .delete(TorrentIdOrHash::Id(active.id), drop_data)
            .await
            .context("Failed to detach stream torrent")?;

        tracing::info!(
            completion = completion,
            dropped = drop_data,
            "Torrent stream stopped"
        );
        self.events.send(WsEvent::TorrentStreamStopped);
        self.consecutive_timeouts.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_internal(&self, drop_data: bool) -> Result<()> {
        let Some(active) = self.current.lock().await.take() else {
            return Ok(());
        };
        let session = self.session().await?;
        session
            .delete(TorrentIdOrHash::Id(active.id), drop_data)
            .await
            .ok();
        Ok(())
    }
}

/// Pick the file whose parsed episode matches; prefer the configured
/// resolution when several do.
fn auto_select_file(files: &[(usize, String, u64)], episode: i32) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (index, path, _) in files {
        let name = path.rsplit('/').next().unwrap_or(path);
        let parsed = parser::parse(name);
        if parsed.extension.is_empty() {
            continue;
        }
        let Some(parsed_episode) = parsed.episode_number() else {
            // Single-file torrents with no episode number still stream.
            if files.len() == 1 {
                return Some(*index);
            }
            continue;
        };
        if parsed_episode != episode {
            continue;
        }
        let resolution = parsed
            .resolution
            .trim_end_matches(['p', 'P'])
            .parse::<i32>()
            .unwrap_or(0);
        if best.is_none_or(|(_, r)| resolution > r) {
            best = Some((*index, resolution));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_select_matches_episode() {
        let files = vec![
            (0, "Show/[Grp] Show - 01 [1080p].mkv".to_string(), 1000),
            (1, "Show/[Grp] Show - 02 [1080p].mkv".to_string(), 1000),
            (2, "Show/readme.txt".to_string(), 10),
        ];
        assert_eq!(auto_select_file(&files, 2), Some(1));
        assert_eq!(auto_select_file(&files, 9), None);
    }

    #[test]
    fn test_auto_select_prefers_higher_resolution() {
        let files = vec![
            (0, "[Grp] Show - 03 [720p].mkv".to_string(), 1000),
            (1, "[Grp] Show - 03 [1080p].mkv".to_string(), 1000),
        ];
        assert_eq!(auto_select_file(&files, 3), Some(1));
    }

    #[test]
    fn test_single_file_without_episode() {
        let files = vec![(0, "Kimi no Na wa (2016) [BD].mkv".to_string(), 1000)];
        assert_eq!(auto_select_file(&files, 1), Some(0));
    }
}
