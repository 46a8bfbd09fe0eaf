//! Process-wide event bus
//!
//! Typed events are fanned out over a broadcast channel to every connected
//! `/api/v1/events` WebSocket and to internal listeners (auto-scanner,
//! nakama relays).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events pushed to clients over the events WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum WsEvent {
    ScanStarted,
    ScanProgress { scanned: u32, total: u32 },
    ScanCompleted { summary_id: i64 },
    LibraryUpdated,

    AutoDownloaderRunStarted,
    AutoDownloaderRunCompleted { queued: u32 },
    AutoDownloaderItemAdded { torrent_name: String },

    TorrentClientProgress(serde_json::Value),

    TorrentStreamLoading,
    TorrentStreamReady { stream_url: String },
    TorrentStreamStatus(serde_json::Value),
    TorrentStreamStalled,
    TorrentStreamStopped,

    MediaStreamSessionStarted { hash: String },
    MediaStreamSessionEnded { hash: String },

    PlaybackStateChanged(serde_json::Value),
    PlaybackProgressUpdated { media_id: i64, progress: i32 },

    ExtensionInstalled { id: String },
    ExtensionUninstalled { id: String },
    ExtensionStatusChanged { id: String, status: String },

    NakamaPeerConnected { peer_id: String, username: String },
    NakamaPeerDisconnected { peer_id: String },
    NakamaWatchPartyState(serde_json::Value),

    /// Toast notification surfaced by the web UI
    Notification { level: String, message: String },
}

/// Cloneable handle to the event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WsEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send an event to all subscribers. Lagging subscribers miss events
    /// rather than blocking the sender.
    pub fn send(&self, event: WsEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.tx.subscribe()
    }

    /// Shorthand for a toast notification.
    pub fn notify(&self, level: &str, message: impl Into<String>) {
        self.send(WsEvent::Notification {
            level: level.to_string(),
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_fanout() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.send(WsEvent::ScanStarted);

        assert!(matches!(rx1.recv().await.unwrap(), WsEvent::ScanStarted));
        assert!(matches!(rx2.recv().await.unwrap(), WsEvent::ScanStarted));
    }

    #[test]
    fn test_event_serialization() {
        let event = WsEvent::AutoDownloaderItemAdded {
            torrent_name: "[Group] Show - 03".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auto-downloader-item-added");
        assert_eq!(json["payload"]["torrent_name"], "[Group] Show - 03");
    }
}
