//! Continuity store
//!
//! Per-media resume points kept in a file-cache bucket. The bucket holds at
//! most [WATCH_HISTORY_CAP] items; when full, the item with the oldest
//! `time_updated` is evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::FileCacher;

const BUCKET: &str = "watch_history";
pub const WATCH_HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchHistoryKind {
    Onlinestream,
    Mediastream,
    ExternalPlayer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryItem {
    pub media_id: i64,
    pub kind: WatchHistoryKind,
    /// Only meaningful for local playback kinds
    #[serde(default)]
    pub file_path: String,
    pub episode: i32,
    pub current_time: f64,
    pub duration: f64,
    pub time_added: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ContinuityStore {
    cache: FileCacher,
    cap: usize,
}

impl ContinuityStore {
    pub fn new(cache: FileCacher) -> Self {
        Self {
            cache,
            cap: WATCH_HISTORY_CAP,
        }
    }

    #[cfg(test)]
    fn with_cap(cache: FileCacher, cap: usize) -> Self {
        Self { cache, cap }
    }

    pub fn get(&self, media_id: i64) -> Option<WatchHistoryItem> {
        self.cache.get(BUCKET, &media_id.to_string())
    }

    /// Insert or refresh the resume point for a media id, then enforce the
    /// capacity by evicting the stalest items.
    pub fn update(
        &self,
        media_id: i64,
        kind: WatchHistoryKind,
        file_path: &str,
        episode: i32,
        current_time: f64,
        duration: f64,
    ) {
        let now = Utc::now();
        let time_added = self.get(media_id).map(|i| i.time_added).unwrap_or(now);
        let item = WatchHistoryItem {
            media_id,
            kind,
            file_path: file_path.to_string(),
            episode,
            current_time,
            duration,
            time_added,
            time_updated: now,
        };
        if let Err(e) = self.cache.set(BUCKET, &media_id.to_string(), &item, None) {
            tracing::warn!(media_id = media_id, error = %e, "Failed to persist watch history item");
            return;
        }
        self.enforce_cap();
    }

    pub fn remove(&self, media_id: i64) {
        self.cache.remove(BUCKET, &media_id.to_string());
    }

    /// All items, most recently updated first.
    pub fn list(&self) -> Vec<WatchHistoryItem> {
        let mut items: Vec<WatchHistoryItem> = self
            .cache
            .all::<WatchHistoryItem>(BUCKET)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        items.sort_by(|a, b| b.time_updated.cmp(&a.time_updated));
        items
    }

    fn enforce_cap(&self) {
        let items = self.list();
        if items.len() <= self.cap {
            return;
        }
        for item in &items[self.cap..] {
            self.cache.remove(BUCKET, &item.media_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cap: usize) -> (tempfile::TempDir, ContinuityStore) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacher::new(dir.path().to_path_buf()).unwrap();
        (dir, ContinuityStore::with_cap(cache, cap))
    }

    #[test]
    fn test_update_and_get() {
        let (_dir, store) = store(50);
        store.update(7, WatchHistoryKind::Mediastream, "/a/ep3.mkv", 3, 120.5, 1440.0);
        let item = store.get(7).unwrap();
        assert_eq!(item.episode, 3);
        assert_eq!(item.current_time, 120.5);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let (_dir, store) = store(50);
        for i in 0..51 {
            store.update(i, WatchHistoryKind::Mediastream, "", 1, 0.0, 0.0);
            // Distinct timestamps so eviction order is deterministic
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let items = store.list();
        assert_eq!(items.len(), 50);
        // The first inserted media id (0) is the one evicted
        assert!(store.get(0).is_none());
        assert!(store.get(50).is_some());
    }

    #[test]
    fn test_update_refreshes_position() {
        let (_dir, store) = store(3);
        store.update(1, WatchHistoryKind::ExternalPlayer, "/x.mkv", 1, 10.0, 100.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.update(1, WatchHistoryKind::ExternalPlayer, "/x.mkv", 1, 50.0, 100.0);
        let items = store.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].current_time, 50.0);
    }
}
