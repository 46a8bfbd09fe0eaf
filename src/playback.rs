//! Playback manager
//!
//! Owns the single "current playback" slot and the playlist queue. Progress
//! arrives either from media-player events or from manual tracking updates
//! sent by clients without introspection. When playback ends past the
//! completion threshold the list service gets a progress update and the
//! playlist advances. A session mutex prevents re-entrance.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::db::{Database, PlaylistRecord};
use crate::events::{EventBus, WsEvent};
use crate::library::{ContinuityStore, WatchHistoryKind};
use crate::platform::Platform;

/// Watched fraction past which an episode counts as completed.
pub const COMPLETION_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Opening,
    Tracking,
    Ended,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackKind {
    LocalFile,
    Mediastream,
    Onlinestream,
    TorrentStream,
    ExternalPlayer,
}

impl PlaybackKind {
    fn history_kind(&self) -> WatchHistoryKind {
        match self {
            PlaybackKind::Onlinestream => WatchHistoryKind::Onlinestream,
            PlaybackKind::ExternalPlayer => WatchHistoryKind::ExternalPlayer,
            _ => WatchHistoryKind::Mediastream,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSession {
    pub media_id: i64,
    pub episode: i32,
    pub kind: PlaybackKind,
    #[serde(default)]
    pub file_path: String,
    pub state: PlaybackState,
    pub current_time: f64,
    pub duration: f64,
    pub started_at: DateTime<Utc>,
    /// Playlist this session advances through, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<i64>,
    /// Whether the completion update was already issued
    #[serde(default)]
    progress_updated: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPlaybackOptions {
    pub media_id: i64,
    pub episode: i32,
    pub kind: PlaybackKind,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub playlist_id: Option<i64>,
}

#[derive(Clone)]
pub struct PlaybackManager {
    db: Database,
    platform: Platform,
    continuity: ContinuityStore,
    events: EventBus,
    current: Arc<Mutex<Option<PlaybackSession>>>,
}

impl PlaybackManager {
    pub fn new(
        db: Database,
        platform: Platform,
        continuity: ContinuityStore,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            platform,
            continuity,
            events,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current(&self) -> Option<PlaybackSession> {
        self.current.lock().clone()
    }

    /// Open a playback session, replacing any previous one.
    pub fn start(&self, opts: StartPlaybackOptions) -> PlaybackSession {
        let session = PlaybackSession {
            media_id: opts.media_id,
            episode: opts.episode,
            kind: opts.kind,
            file_path: opts.file_path,
            state: PlaybackState::Opening,
            current_time: 0.0,
            duration: 0.0,
            started_at: Utc::now(),
            playlist_id: opts.playlist_id,
            progress_updated: false,
        };
        *self.current.lock() = Some(session.clone());
        self.emit_state(&session);
        tracing::info!(
            media_id = session.media_id,
            episode = session.episode,
            kind = ?session.kind,
            "Playback opened"
        );
        session
    }

    /// Progress update from the player or from manual tracking.
    pub async fn progress(&self, current_time: f64, duration: f64) -> Result<()> {
        let session = {
            let mut guard = self.current.lock();
            let Some(session) = guard.as_mut() else {
                return Ok(());
            };
            session.state = PlaybackState::Tracking;
            session.current_time = current_time;
            session.duration = duration;
            session.clone()
        };

        self.continuity.update(
            session.media_id,
            session.kind.history_kind(),
            &session.file_path,
            session.episode,
            current_time,
            duration,
        );
        self.emit_state(&session);

        // Completion: issue the list update once per session.
        if duration > 0.0 && current_time / duration >= COMPLETION_THRESHOLD {
            let should_update = {
                let mut guard = self.current.lock();
                match guard.as_mut() {
                    Some(s) if !s.progress_updated => {
                        s.progress_updated = true;
                        true
                    }
                    _ => false,
                }
            };
            if should_update {
                self.push_progress(&session).await;
            }
        }
        Ok(())
    }

    async fn push_progress(&self, session: &PlaybackSession) {
        match self
            .platform
            .update_progress(session.media_id, session.episode)
            .await
        {
            Ok(()) => {
                self.events.send(WsEvent::PlaybackProgressUpdated {
                    media_id: session.media_id,
                    progress: session.episode,
                });
            }
            Err(e) => {
                tracing::warn!(media_id = session.media_id, error = %e, "Progress update failed");
            }
        }
    }

    /// Player reported the end of playback. Advances the playlist when the
    /// session completed.
    pub async fn ended(&self) -> Result<Option<PlaybackSession>> {
        let session = {
            let mut guard = self.current.lock();
            let Some(mut session) = guard.take() else {
                return Ok(None);
            };
            session.state = PlaybackState::Ended;
            session
        };
        self.emit_state(&session);

        let completed = session.duration > 0.0
            && session.current_time / session.duration >= COMPLETION_THRESHOLD;
        if completed && !session.progress_updated {
            self.push_progress(&session).await;
        }
        if completed {
            if let Some(next) = self.advance_playlist(&session).await? {
                return Ok(Some(self.start(next)));
            }
        }
        Ok(None)
    }

    /// User cancelled playback; no progress update, no playlist advance.
    pub fn cancelled(&self) {
        let mut guard = self.current.lock();
        if let Some(mut session) = guard.take() {
            session.state = PlaybackState::Cancelled;
            self.emit_state(&session);
        }
    }

    async fn advance_playlist(
        &self,
        session: &PlaybackSession,
    ) -> Result<Option<StartPlaybackOptions>> {
        let Some(playlist_id) = session.playlist_id else {
            return Ok(None);
        };
        let playlist: PlaylistRecord = match self.db.playlists().get(playlist_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let position = playlist
            .entries
            .iter()
            .position(|e| e.media_id == session.media_id && e.episode == session.episode);
        let next = match position {
            Some(i) => playlist.entries.get(i + 1),
            None => playlist.entries.first(),
        };
        Ok(next.map(|entry| StartPlaybackOptions {
            media_id: entry.media_id,
            episode: entry.episode,
            kind: session.kind,
            file_path: entry.path.clone(),
            playlist_id: Some(playlist_id),
        }))
    }

    fn emit_state(&self, session: &PlaybackSession) {
        self.events.send(WsEvent::PlaybackStateChanged(
            serde_json::to_value(session).unwrap_or_default(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCacher;
    use crate::db::playlists::PlaylistEntry;

    async fn manager(dir: &tempfile::TempDir) -> PlaybackManager {
        let db = Database::connect_memory().await.unwrap();
        let cache = FileCacher::new(dir.path().to_path_buf()).unwrap();
        let platform = Platform::new(db.clone(), cache.clone());
        let continuity = ContinuityStore::new(cache);
        PlaybackManager::new(db, platform, continuity, EventBus::new())
    }

    fn opts(media_id: i64, episode: i32) -> StartPlaybackOptions {
        StartPlaybackOptions {
            media_id,
            episode,
            kind: PlaybackKind::LocalFile,
            file_path: format!("/mnt/anime/ep{episode}.mkv"),
            playlist_id: None,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_idle_to_ended() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir).await;
        assert!(m.current().is_none());

        m.start(opts(101, 3));
        assert_eq!(m.current().unwrap().state, PlaybackState::Opening);

        m.progress(60.0, 1440.0).await.unwrap();
        assert_eq!(m.current().unwrap().state, PlaybackState::Tracking);

        m.ended().await.unwrap();
        assert!(m.current().is_none());
    }

    #[tokio::test]
    async fn test_progress_persists_continuity() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir).await;
        m.start(opts(7, 2));
        m.progress(100.0, 1440.0).await.unwrap();

        let item = m.continuity.get(7).unwrap();
        assert_eq!(item.episode, 2);
        assert_eq!(item.current_time, 100.0);
    }

    #[tokio::test]
    async fn test_restart_replaces_session() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir).await;
        m.start(opts(1, 1));
        m.start(opts(2, 5));
        let current = m.current().unwrap();
        assert_eq!(current.media_id, 2);
        assert_eq!(current.episode, 5);
    }

    #[tokio::test]
    async fn test_playlist_advances_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir).await;
        let playlist_id = m
            .db
            .playlists()
            .insert(&PlaylistRecord {
                id: 0,
                name: "queue".to_string(),
                entries: vec![
                    PlaylistEntry {
                        media_id: 1,
                        episode: 1,
                        path: "/a/1.mkv".to_string(),
                    },
                    PlaylistEntry {
                        media_id: 1,
                        episode: 2,
                        path: "/a/2.mkv".to_string(),
                    },
                ],
            })
            .await
            .unwrap();

        let mut o = opts(1, 1);
        o.playlist_id = Some(playlist_id);
        m.start(o);
        m.progress(1400.0, 1440.0).await.unwrap();
        let next = m.ended().await.unwrap().unwrap();
        assert_eq!(next.episode, 2);
        assert_eq!(m.current().unwrap().episode, 2);
    }

    #[tokio::test]
    async fn test_cancelled_does_not_advance() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir).await;
        m.start(opts(1, 1));
        m.progress(1400.0, 1440.0).await.unwrap();
        m.cancelled();
        assert!(m.current().is_none());
    }
}
