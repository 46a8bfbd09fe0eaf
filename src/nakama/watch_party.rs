//! Watch party
//!
//! Host-only session creation; peers join and leave via messages. The host
//! broadcasts playback status on a cadence and emits `seek` as its own
//! event when the position jumps past the session's sync threshold.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{EventBus, WsEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchPartySettings {
    /// Seconds of desync before a forced sync
    pub sync_threshold: f64,
    /// Max seconds to wait for buffering peers
    pub max_buffer_wait: u32,
}

impl Default for WatchPartySettings {
    fn default() -> Self {
        Self {
            sync_threshold: 2.0,
            max_buffer_wait: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPartyParticipant {
    pub id: String,
    pub username: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPartySession {
    pub id: String,
    pub participants: HashMap<String, WatchPartyParticipant>,
    pub settings: WatchPartySettings,
    pub created_at: DateTime<Utc>,
    /// Media currently playing, if the host set one
    #[serde(default)]
    pub current_media: Option<serde_json::Value>,
}

/// Playback state the host broadcasts to peers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub position: f64,
    pub paused: bool,
}

/// Whether a position change is a seek the peers must follow.
pub fn is_seek(previous: f64, current: f64, elapsed: f64, settings: &WatchPartySettings) -> bool {
    let expected = previous + elapsed;
    (current - expected).abs() > settings.sync_threshold
}

pub struct WatchPartyManager {
    events: EventBus,
    session: RwLock<Option<WatchPartySession>>,
}

impl WatchPartyManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            session: RwLock::new(None),
        }
    }

    pub fn session(&self) -> Option<WatchPartySession> {
        self.session.read().clone()
    }

    /// Create a session. Host-only; any previous session is replaced.
    pub fn create(&self, host_username: &str, settings: WatchPartySettings) -> WatchPartySession {
        let host_id = Uuid::new_v4().to_string();
        let mut participants = HashMap::new();
        participants.insert(
            host_id.clone(),
            WatchPartyParticipant {
                id: host_id,
                username: host_username.to_string(),
                is_host: true,
                is_ready: true,
                last_seen: Utc::now(),
            },
        );
        let session = WatchPartySession {
            id: Uuid::new_v4().to_string(),
            participants,
            settings,
            created_at: Utc::now(),
            current_media: None,
        };
        *self.session.write() = Some(session.clone());
        self.emit_state();
        tracing::info!(session_id = %session.id, "Watch party created");
        session
    }

    pub fn join(&self, peer_id: &str, username: &str) -> Option<WatchPartySession> {
        let mut guard = self.session.write();
        let session = guard.as_mut()?;
        session.participants.insert(
            peer_id.to_string(),
            WatchPartyParticipant {
                id: peer_id.to_string(),
                username: username.to_string(),
                is_host: false,
                is_ready: false,
                last_seen: Utc::now(),
            },
        );
        let snapshot = session.clone();
        drop(guard);
        self.emit_state();
        tracing::info!(peer_id = peer_id, "Peer joined watch party");
        Some(snapshot)
    }

    pub fn leave(&self, peer_id: &str) {
        let mut guard = self.session.write();
        if let Some(session) = guard.as_mut() {
            session.participants.remove(peer_id);
        }
        drop(guard);
        self.emit_state();
    }

    pub fn set_ready(&self, peer_id: &str, ready: bool) {
        let mut guard = self.session.write();
        if let Some(session) = guard.as_mut() {
            if let Some(p) = session.participants.get_mut(peer_id) {
                p.is_ready = ready;
                p.last_seen = Utc::now();
            }
        }
    }

    pub fn set_media(&self, media: serde_json::Value) {
        let mut guard = self.session.write();
        if let Some(session) = guard.as_mut() {
            session.current_media = Some(media);
        }
        drop(guard);
        self.emit_state();
    }

    /// Everyone (but the host) is buffered and ready.
    pub fn all_ready(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|s| s.participants.values().all(|p| p.is_ready))
            .unwrap_or(false)
    }

    pub fn stop(&self) {
        *self.session.write() = None;
        self.events
            .send(WsEvent::NakamaWatchPartyState(serde_json::Value::Null));
        tracing::info!("Watch party stopped");
    }

    fn emit_state(&self) {
        let state = self
            .session
            .read()
            .as_ref()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(serde_json::Value::Null);
        self.events.send(WsEvent::NakamaWatchPartyState(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_join_leave() {
        let m = WatchPartyManager::new(EventBus::new());
        assert!(m.session().is_none());
        let session = m.create("host", WatchPartySettings::default());
        assert_eq!(session.participants.len(), 1);

        m.join("peer-1", "alex");
        assert_eq!(m.session().unwrap().participants.len(), 2);

        m.leave("peer-1");
        assert_eq!(m.session().unwrap().participants.len(), 1);

        m.stop();
        assert!(m.session().is_none());
    }

    #[test]
    fn test_join_without_session() {
        let m = WatchPartyManager::new(EventBus::new());
        assert!(m.join("p", "x").is_none());
    }

    #[test]
    fn test_seek_detection() {
        let settings = WatchPartySettings {
            sync_threshold: 2.0,
            max_buffer_wait: 10,
        };
        // Normal forward playback: 1s elapsed, position advanced 1s
        assert!(!is_seek(10.0, 11.0, 1.0, &settings));
        // Jump far ahead
        assert!(is_seek(10.0, 120.0, 1.0, &settings));
        // Jump backwards
        assert!(is_seek(120.0, 10.0, 1.0, &settings));
        // Small drift below threshold
        assert!(!is_seek(10.0, 12.5, 1.0, &settings));
    }

    #[test]
    fn test_ready_tracking() {
        let m = WatchPartyManager::new(EventBus::new());
        m.create("host", WatchPartySettings::default());
        m.join("peer-1", "alex");
        assert!(!m.all_ready());
        m.set_ready("peer-1", true);
        assert!(m.all_ready());
    }
}
