//! Transcode core
//!
//! Hash-keyed transcode sessions: a session exists per `(hash, client)` and
//! owns one segment scheduler per requested quality or audio stream. The
//! probe result (streams + keyframes) is cached per hash; subtitles and
//! attachments are extracted once per hash. Sessions are garbage-collected
//! on inactivity, transcode directories are evicted LRU under a disk
//! budget, and shutdown kills every ffmpeg head and removes temp dirs.

pub mod extract;
pub mod playlist;
pub mod probe;
pub mod stream;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::cache::FileCacher;
use crate::events::{EventBus, WsEvent};
pub use playlist::VideoQuality;
pub use probe::MediaInfo;
pub use stream::{SegmentError, StreamKind, TranscodeStream};

const PROBE_BUCKET: &str = "mediastream_probe";
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Stable hash of a source path; keys the transcode directory.
pub fn stable_hash(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    digest
        .iter()
        .take(12)
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct TranscodeSession {
    hash: String,
    info: Arc<MediaInfo>,
    boundaries: Arc<Vec<f64>>,
    streams: HashMap<String, Arc<TranscodeStream>>,
    last_access: Instant,
}

impl TranscodeSession {
    fn touch(&mut self) {
        self.last_access = Instant::now();
    }
}

pub struct Transcoder {
    transcode_dir: PathBuf,
    ffmpeg_path: String,
    ffprobe_path: String,
    cache: FileCacher,
    events: EventBus,
    sessions: Mutex<HashMap<(String, String), TranscodeSession>>,
    extractions: Mutex<HashMap<String, Arc<OnceCell<Vec<extract::ExtractedSubtitle>>>>>,
}

impl Transcoder {
    pub fn new(
        transcode_dir: PathBuf,
        ffmpeg_path: String,
        ffprobe_path: String,
        cache: FileCacher,
        events: EventBus,
    ) -> Self {
        Self {
            transcode_dir,
            ffmpeg_path,
            ffprobe_path,
            cache,
            events,
            sessions: Mutex::new(HashMap::new()),
            extractions: Mutex::new(HashMap::new()),
        }
    }

    /// Probe a source once per hash; cached across restarts.
    pub async fn media_info(&self, path: &Path) -> Result<Arc<MediaInfo>> {
        let hash = stable_hash(&path.to_string_lossy());
        if let Some(cached) = self.cache.get::<MediaInfo>(PROBE_BUCKET, &hash) {
            return Ok(Arc::new(cached));
        }
        let info = probe::probe(&self.ffprobe_path, path)
            .await
            .with_context(|| format!("Failed to probe {}", path.display()))?;
        let _ = self.cache.set(PROBE_BUCKET, &hash, &info, None);
        Ok(Arc::new(info))
    }

    fn hash_dir(&self, hash: &str) -> PathBuf {
        self.transcode_dir.join(hash)
    }

    /// Ensure a session exists and return its key data.
    async fn session_for(
        &self,
        path: &Path,
        client_id: &str,
    ) -> Result<(String, Arc<MediaInfo>, Arc<Vec<f64>>)> {
        let hash = stable_hash(&path.to_string_lossy());
        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(&(hash.clone(), client_id.to_string())) {
                session.touch();
                return Ok((hash, session.info.clone(), session.boundaries.clone()));
            }
        }

        let info = self.media_info(path).await?;
        let boundaries = Arc::new(playlist::segment_boundaries(&info.keyframes, info.duration));
        let session = TranscodeSession {
            hash: hash.clone(),
            info: info.clone(),
            boundaries: boundaries.clone(),
            streams: HashMap::new(),
            last_access: Instant::now(),
        };
        self.sessions
            .lock()
            .insert((hash.clone(), client_id.to_string()), session);
        self.events.send(WsEvent::MediaStreamSessionStarted { hash: hash.clone() });
        Ok((hash, info, boundaries))
    }

    fn stream_for(
        &self,
        hash: &str,
        client_id: &str,
        kind: StreamKind,
        input: &Path,
        boundaries: Arc<Vec<f64>>,
        duration: f64,
    ) -> Result<Arc<TranscodeStream>> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&(hash.to_string(), client_id.to_string()))
            .context("Transcode session ended")?;
        session.touch();
        Ok(session
            .streams
            .entry(kind.dir_name())
            .or_insert_with(|| {
                Arc::new(TranscodeStream::new(
                    kind,
                    input.to_path_buf(),
                    self.hash_dir(hash).join(kind.dir_name()),
                    boundaries,
                    duration,
                    self.ffmpeg_path.clone(),
                ))
            })
            .clone())
    }

    /// The HLS master playlist for a source.
    pub async fn master_playlist(&self, path: &Path, client_id: &str) -> Result<String> {
        let (hash, info, _) = self.session_for(path, client_id).await?;
        let base = format!("/api/v1/mediastream/transcode/{hash}");
        Ok(playlist::master_playlist(&info, &base))
    }

    /// A video variant playlist.
    pub async fn variant_playlist(
        &self,
        path: &Path,
        client_id: &str,
        _quality: VideoQuality,
    ) -> Result<String> {
        let (_, info, boundaries) = self.session_for(path, client_id).await?;
        Ok(playlist::media_playlist(&boundaries, info.duration, "segment"))
    }

    /// An audio rendition playlist.
    pub async fn audio_playlist(
        &self,
        path: &Path,
        client_id: &str,
        audio_index: usize,
    ) -> Result<String> {
        let (_, info, boundaries) = self.session_for(path, client_id).await?;
        anyhow::ensure!(
            audio_index < info.audio_streams.len(),
            "No such audio stream: {audio_index}"
        );
        Ok(playlist::media_playlist(&boundaries, info.duration, "segment"))
    }

    /// Path to a ready video segment, scheduling or waiting as needed.
    pub async fn video_segment(
        &self,
        path: &Path,
        client_id: &str,
        quality: VideoQuality,
        index: usize,
    ) -> Result<PathBuf, SegmentError> {
        let (hash, info, boundaries) = self
            .session_for(path, client_id)
            .await
            .map_err(|e| SegmentError::Other(e.to_string()))?;
        let stream = self
            .stream_for(
                &hash,
                client_id,
                StreamKind::Video(quality),
                path,
                boundaries,
                info.duration,
            )
            .map_err(|e| SegmentError::Other(e.to_string()))?;
        stream.get_segment(index).await
    }

    pub async fn audio_segment(
        &self,
        path: &Path,
        client_id: &str,
        audio_index: usize,
        index: usize,
    ) -> Result<PathBuf, SegmentError> {
        let (hash, info, boundaries) = self
            .session_for(path, client_id)
            .await
            .map_err(|e| SegmentError::Other(e.to_string()))?;
        let stream = self
            .stream_for(
                &hash,
                client_id,
                StreamKind::Audio(audio_index),
                path,
                boundaries,
                info.duration,
            )
            .map_err(|e| SegmentError::Other(e.to_string()))?;
        stream.get_segment(index).await
    }

    /// One-shot subtitle/attachment extraction per hash; concurrent callers
    /// share the same run and await its completion.
    pub async fn extract_subtitles(&self, path: &Path) -> Result<Vec<extract::ExtractedSubtitle>> {
        let hash = stable_hash(&path.to_string_lossy());
        let cell = {
            let mut extractions = self.extractions.lock();
            extractions
                .entry(hash.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let info = self.media_info(path).await?;
        let dir = self.hash_dir(&hash);
        let ffmpeg = self.ffmpeg_path.clone();
        let result = cell
            .get_or_try_init(|| async move { extract::extract_all(&ffmpeg, &info, &dir).await })
            .await?;
        Ok(result.clone())
    }

    pub fn attachment_path(&self, hash: &str, name: &str) -> Option<PathBuf> {
        extract::attachment_path(&self.hash_dir(hash), name)
    }

    pub fn subtitle_path(&self, hash: &str, name: &str) -> Option<PathBuf> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return None;
        }
        Some(self.hash_dir(hash).join(name))
    }

    /// Kill sessions idle past the timeout. Invoked by the GC job.
    pub fn reap_idle_sessions(&self) {
        let mut ended = Vec::new();
        {
            let mut sessions = self.sessions.lock();
            sessions.retain(|_, session| {
                let keep = session.last_access.elapsed() < SESSION_IDLE_TIMEOUT;
                if !keep {
                    for stream in session.streams.values() {
                        stream.kill();
                    }
                    ended.push(session.hash.clone());
                }
                keep
            });
        }
        for hash in ended {
            tracing::info!(hash = %hash, "Reaped idle transcode session");
            self.events.send(WsEvent::MediaStreamSessionEnded { hash });
        }
    }

    /// Evict least-recently-used transcode directories until total disk use
    /// fits the budget. Directories of live sessions are spared.
    pub async fn enforce_disk_budget(&self, budget_bytes: u64) {
        let live: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions.values().map(|s| s.hash.clone()).collect()
        };

        let mut dirs: Vec<(PathBuf, u64, std::time::SystemTime)> = Vec::new();
        let mut total: u64 = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.transcode_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let size = dir_size(&path).await;
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            total += size;
            dirs.push((path, size, modified));
        }
        if total <= budget_bytes {
            return;
        }

        dirs.sort_by_key(|(_, _, modified)| *modified);
        for (path, size, _) in dirs {
            if total <= budget_bytes {
                break;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if live.contains(&name) {
                continue;
            }
            if tokio::fs::remove_dir_all(&path).await.is_ok() {
                tracing::info!(dir = %path.display(), "Evicted transcode directory");
                total = total.saturating_sub(size);
                self.extractions.lock().remove(&name);
            }
        }
    }

    /// Kill every ffmpeg process and remove temp directories.
    pub async fn shutdown(&self) {
        let sessions: Vec<TranscodeSession> = {
            let mut guard = self.sessions.lock();
            guard.drain().map(|(_, s)| s).collect()
        };
        for session in &sessions {
            for stream in session.streams.values() {
                stream.kill();
            }
        }
        let _ = tokio::fs::remove_dir_all(&self.transcode_dir).await;
        let _ = tokio::fs::create_dir_all(&self.transcode_dir).await;
        tracing::info!("Transcoder shut down");
    }
}

async fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else { continue };
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_is_stable_and_short() {
        let a = stable_hash("/mnt/anime/Show/ep1.mkv");
        let b = stable_hash("/mnt/anime/Show/ep1.mkv");
        let c = stable_hash("/mnt/anime/Show/ep2.mkv");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 24);
    }

    #[tokio::test]
    async fn test_dir_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(dir.path()).await, 150);
    }
}
