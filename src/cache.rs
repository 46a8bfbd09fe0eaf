//! Bucketed file cache with per-bucket TTLs
//!
//! Each bucket is a single JSON file under the cache directory mapping keys
//! to timestamped entries. Metadata fetchers, the list mirror, the watch
//! history and the stream caches all go through this store. Expiry is lazy:
//! an expired entry is treated as absent on read and dropped on the next
//! write or during [FileCacher::gc].

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Entry {
    /// None = never expires
    expires_at: Option<DateTime<Utc>>,
    value: Value,
}

type Bucket = HashMap<String, Entry>;

/// Disk-backed KV cache. Internally synchronised; cheap to clone.
#[derive(Clone)]
pub struct FileCacher {
    dir: PathBuf,
    buckets: std::sync::Arc<Mutex<HashMap<String, Bucket>>>,
}

impl FileCacher {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            buckets: std::sync::Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.dir.join(format!("{bucket}.cache.json"))
    }

    fn load_bucket(&self, bucket: &str) -> Bucket {
        let path = self.bucket_path(bucket);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Bucket::default(),
        }
    }

    fn persist_bucket(&self, bucket: &str, data: &Bucket) {
        let path = self.bucket_path(bucket);
        if let Ok(bytes) = serde_json::to_vec(data) {
            if let Err(e) = std::fs::write(&path, bytes) {
                tracing::warn!(bucket = bucket, error = %e, "Failed to persist cache bucket");
            }
        }
    }

    fn with_bucket<R>(&self, bucket: &str, f: impl FnOnce(&mut Bucket) -> (bool, R)) -> R {
        let mut buckets = self.buckets.lock();
        if !buckets.contains_key(bucket) {
            let loaded = self.load_bucket(bucket);
            buckets.insert(bucket.to_string(), loaded);
        }
        let data = buckets.get_mut(bucket).expect("bucket just inserted");
        let (dirty, ret) = f(data);
        if dirty {
            self.persist_bucket(bucket, data);
        }
        ret
    }

    /// Get a value, treating expired entries as absent.
    pub fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Option<T> {
        self.with_bucket(bucket, |data| {
            let entry = match data.get(key) {
                Some(e) => e,
                None => return (false, None),
            };
            if let Some(expires_at) = entry.expires_at {
                if expires_at < Utc::now() {
                    data.remove(key);
                    return (true, None);
                }
            }
            let value = serde_json::from_value(entry.value.clone()).ok();
            (false, value)
        })
    }

    /// Set a value with a TTL. `None` never expires.
    pub fn set<T: Serialize>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.with_bucket(bucket, |data| {
            data.insert(key.to_string(), Entry { expires_at, value });
            (true, ())
        });
        Ok(())
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.with_bucket(bucket, |data| (data.remove(key).is_some(), ()));
    }

    pub fn clear_bucket(&self, bucket: &str) {
        self.with_bucket(bucket, |data| {
            let was_empty = data.is_empty();
            data.clear();
            (!was_empty, ())
        });
    }

    /// All live (non-expired) values of a bucket.
    pub fn all<T: DeserializeOwned>(&self, bucket: &str) -> Vec<(String, T)> {
        self.with_bucket(bucket, |data| {
            let now = Utc::now();
            let mut out = Vec::new();
            for (k, e) in data.iter() {
                if e.expires_at.is_some_and(|t| t < now) {
                    continue;
                }
                if let Ok(v) = serde_json::from_value(e.value.clone()) {
                    out.push((k.clone(), v));
                }
            }
            (false, out)
        })
    }

    /// Drop expired entries from every loaded bucket and rewrite them.
    pub fn gc(&self) {
        let names: Vec<String> = { self.buckets.lock().keys().cloned().collect() };
        let now = Utc::now();
        for name in names {
            self.with_bucket(&name, |data| {
                let before = data.len();
                data.retain(|_, e| !e.expires_at.is_some_and(|t| t < now));
                (data.len() != before, ())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cacher() -> (tempfile::TempDir, FileCacher) {
        let dir = tempfile::tempdir().unwrap();
        let cacher = FileCacher::new(dir.path().to_path_buf()).unwrap();
        (dir, cacher)
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_dir, cache) = cacher();
        cache.set("meta", "anime:1", &vec![1, 2, 3], None).unwrap();
        let got: Vec<i32> = cache.get("meta", "anime:1").unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let (_dir, cache) = cacher();
        cache
            .set("meta", "k", &"v".to_string(), Some(Duration::from_secs(0)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get::<String>("meta", "k"), None);
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FileCacher::new(dir.path().to_path_buf()).unwrap();
            cache.set("b", "k", &42u32, None).unwrap();
        }
        let cache = FileCacher::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(cache.get::<u32>("b", "k"), Some(42));
    }
}
