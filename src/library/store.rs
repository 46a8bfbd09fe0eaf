//! Library store
//!
//! Owns the canonical local-file set: an in-memory slice behind a
//! reader-writer lock, backed by versioned JSON blobs in the database
//! (current = highest row id). `replace` is the only operation that can
//! shrink the set; everything else is read-modify-write under the write
//! lock, so readers observe the new set as soon as a mutation returns.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::local_file::{LocalFile, normalize_path};
use crate::db::Database;

/// Bulk operations applied to every file of one media id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BulkOp {
    /// Reset media id to 0 and clear the lock
    Unmatch,
    /// Toggle the locked bit of every matched file
    ToggleLock,
}

/// Patch applied by [LibraryStore::update_one].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFilePatch {
    pub media_id: Option<i64>,
    pub locked: Option<bool>,
    pub ignored: Option<bool>,
    pub episode: Option<i32>,
}

#[derive(Clone)]
pub struct LibraryStore {
    db: Database,
    files: Arc<RwLock<Arc<Vec<LocalFile>>>>,
}

/// Number of historical set versions kept as a safety net.
const KEPT_VERSIONS: i64 = 10;

impl LibraryStore {
    /// Load the store, hydrating from the latest persisted set.
    pub async fn load(db: Database) -> Result<Self> {
        let files = match db.local_file_sets().latest::<Vec<LocalFile>>().await? {
            Some((id, files)) => {
                tracing::info!(version = id, files = files.len(), "Loaded local file set");
                files
            }
            None => Vec::new(),
        };
        Ok(Self {
            db,
            files: Arc::new(RwLock::new(Arc::new(files))),
        })
    }

    /// Snapshot of the current set. Cheap; shares the underlying vector.
    pub fn get(&self) -> Arc<Vec<LocalFile>> {
        self.files.read().clone()
    }

    /// Replace the whole set. The only way the set can shrink.
    pub async fn replace(&self, files: Vec<LocalFile>) -> Result<()> {
        let files = Arc::new(files);
        self.db.local_file_sets().insert(files.as_ref()).await?;
        let _ = self.db.local_file_sets().prune(KEPT_VERSIONS).await;
        *self.files.write() = files;
        Ok(())
    }

    /// Apply a bulk operation to every file of a media id.
    pub async fn bulk(&self, op: BulkOp, media_id: i64) -> Result<usize> {
        self.mutate(|files| {
            let mut touched = 0;
            for lf in files.iter_mut().filter(|lf| lf.media_id == media_id) {
                match op {
                    BulkOp::Unmatch => {
                        lf.media_id = 0;
                        lf.locked = false;
                    }
                    BulkOp::ToggleLock => lf.locked = !lf.locked,
                }
                touched += 1;
            }
            touched
        })
        .await
    }

    /// Patch a single file identified by path.
    pub async fn update_one(&self, path: &str, patch: LocalFilePatch) -> Result<bool> {
        let normalized = normalize_path(path);
        self.mutate(move |files| {
            let Some(lf) = files.iter_mut().find(|lf| lf.normalized_path == normalized) else {
                return false;
            };
            if let Some(media_id) = patch.media_id {
                lf.media_id = media_id;
                // A manual match is an assertion; keep it across rescans.
                if media_id != 0 {
                    lf.locked = true;
                }
            }
            if let Some(locked) = patch.locked {
                lf.locked = locked;
            }
            if let Some(ignored) = patch.ignored {
                lf.ignored = ignored;
            }
            if let Some(episode) = patch.episode {
                lf.metadata.episode = episode;
                lf.metadata.anidb_episode = episode.to_string();
            }
            true
        })
        .await
    }

    /// Remove files whose paths are gone from disk. Caller confirms first.
    pub async fn remove_missing(&self, missing_paths: &[String]) -> Result<usize> {
        let normalized: Vec<String> = missing_paths.iter().map(|p| normalize_path(p)).collect();
        let snapshot = self.get();
        let kept: Vec<LocalFile> = snapshot
            .iter()
            .filter(|lf| !normalized.contains(&lf.normalized_path))
            .cloned()
            .collect();
        let removed = snapshot.len() - kept.len();
        if removed > 0 {
            self.replace(kept).await?;
        }
        Ok(removed)
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut Vec<LocalFile>) -> R) -> Result<R> {
        let (next, ret) = {
            let guard = self.files.read();
            let mut copy = guard.as_ref().clone();
            let ret = f(&mut copy);
            (Arc::new(copy), ret)
        };
        self.db.local_file_sets().insert(next.as_ref()).await?;
        let _ = self.db.local_file_sets().prune(KEPT_VERSIONS).await;
        *self.files.write() = next;
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::local_file::LocalFileKind;

    fn lf(path: &str, media_id: i64) -> LocalFile {
        LocalFile {
            path: path.to_string(),
            normalized_path: normalize_path(path),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            media_id,
            ..Default::default()
        }
    }

    async fn store() -> LibraryStore {
        let db = Database::connect_memory().await.unwrap();
        LibraryStore::load(db).await.unwrap()
    }

    #[tokio::test]
    async fn test_replace_get_roundtrip() {
        let store = store().await;
        let set = vec![lf("/a/one.mkv", 1), lf("/a/two.mkv", 2)];
        store.replace(set.clone()).await.unwrap();

        let got = store.get();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].path, "/a/one.mkv");
    }

    #[tokio::test]
    async fn test_bulk_toggle_lock_is_involution() {
        let store = store().await;
        let mut a = lf("/a/one.mkv", 1);
        a.locked = true;
        let b = lf("/a/two.mkv", 1);
        store.replace(vec![a, b]).await.unwrap();

        store.bulk(BulkOp::ToggleLock, 1).await.unwrap();
        store.bulk(BulkOp::ToggleLock, 1).await.unwrap();

        let got = store.get();
        assert!(got[0].locked);
        assert!(!got[1].locked);
    }

    #[tokio::test]
    async fn test_bulk_unmatch() {
        let store = store().await;
        let mut a = lf("/a/one.mkv", 7);
        a.locked = true;
        store.replace(vec![a, lf("/b/two.mkv", 8)]).await.unwrap();

        let touched = store.bulk(BulkOp::Unmatch, 7).await.unwrap();
        assert_eq!(touched, 1);
        let got = store.get();
        assert_eq!(got[0].media_id, 0);
        assert!(!got[0].locked);
        assert_eq!(got[1].media_id, 8);
    }

    #[tokio::test]
    async fn test_update_one_locks_manual_match() {
        let store = store().await;
        store.replace(vec![lf("/a/One.mkv", 0)]).await.unwrap();

        let found = store
            .update_one(
                "/a/one.mkv",
                LocalFilePatch {
                    media_id: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(found);
        let got = store.get();
        assert_eq!(got[0].media_id, 42);
        assert!(got[0].locked);
        assert_eq!(got[0].metadata.kind, LocalFileKind::Main);
    }

    #[tokio::test]
    async fn test_persisted_across_reload() {
        let db = Database::connect_memory().await.unwrap();
        let store = LibraryStore::load(db.clone()).await.unwrap();
        store.replace(vec![lf("/a/one.mkv", 3)]).await.unwrap();

        let reloaded = LibraryStore::load(db).await.unwrap();
        assert_eq!(reloaded.get()[0].media_id, 3);
    }
}
