//! Metadata port
//!
//! Fetches and caches auxiliary media metadata: episode maps (AniDB episode
//! keys, absolute-number offsets), per-episode details and filler data.
//! Every result is bucketed in the file cache with a per-bucket TTL, and a
//! provider failure always degrades to "no extra metadata" instead of
//! failing the caller.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use serde::{Deserialize, Serialize};

use crate::cache::FileCacher;
use crate::platform::{BaseMedia, Platform};

const MAPPINGS_API: &str = "https://api.ani.zip/mappings";
const BUCKET_METADATA: &str = "anime_metadata";
const BUCKET_FILLER: &str = "filler";
const METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FILLER_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Per-episode details from the mapping provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeMetadata {
    /// Episode key: "1", "2", ... for main episodes, "S1" for specials.
    #[serde(default)]
    pub episode: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub absolute_episode_number: Option<i32>,
    #[serde(default)]
    pub air_date: String,
    #[serde(default)]
    pub length: Option<i32>,
}

/// Mapped metadata for one media id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeMetadata {
    pub media_id: i64,
    #[serde(default)]
    pub episode_count: i32,
    #[serde(default)]
    pub special_count: i32,
    /// Keyed by episode key ("1", "S1", ...)
    #[serde(default)]
    pub episodes: HashMap<String, EpisodeMetadata>,
    /// Offset between absolute and seasonal episode numbers. An absolute
    /// episode N maps to seasonal episode `N - offset`.
    #[serde(default)]
    pub absolute_offset: i32,
}

impl AnimeMetadata {
    pub fn episode(&self, key: &str) -> Option<&EpisodeMetadata> {
        self.episodes.get(key)
    }

    /// Normalise an absolute episode number into the seasonal range, when
    /// the offset is known and the number is clearly absolute.
    pub fn normalize_episode(&self, episode: i32) -> i32 {
        if self.absolute_offset > 0
            && self.episode_count > 0
            && episode > self.episode_count
            && episode - self.absolute_offset > 0
        {
            episode - self.absolute_offset
        } else {
            episode
        }
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cached metadata fetcher. Cheap to clone.
#[derive(Clone)]
pub struct MetadataService {
    client: reqwest::Client,
    cache: FileCacher,
    platform: Platform,
    limiter: Arc<DirectLimiter>,
}

impl MetadataService {
    pub fn new(cache: FileCacher, platform: Platform) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            cache,
            platform,
            // The mapping provider is a free service; stay well under its
            // documented limits.
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(3).expect("nonzero"),
            ))),
        }
    }

    /// Episode map and offsets for a media id. Returns None when the
    /// provider has nothing or is unreachable.
    pub async fn get_anime_metadata(&self, media_id: i64) -> Option<AnimeMetadata> {
        let key = media_id.to_string();
        if let Some(cached) = self.cache.get::<AnimeMetadata>(BUCKET_METADATA, &key) {
            return Some(cached);
        }

        self.limiter.until_ready().await;
        match self.fetch_mappings(media_id).await {
            Ok(Some(metadata)) => {
                let _ = self
                    .cache
                    .set(BUCKET_METADATA, &key, &metadata, Some(METADATA_TTL));
                Some(metadata)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(media_id = media_id, error = %e, "Metadata provider unavailable");
                None
            }
        }
    }

    async fn fetch_mappings(&self, media_id: i64) -> anyhow::Result<Option<AnimeMetadata>> {
        let resp = self
            .client
            .get(MAPPINGS_API)
            .query(&[("anilist_id", media_id.to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = resp.json().await?;

        let mut episodes: HashMap<String, EpisodeMetadata> = HashMap::new();
        let mut episode_count = 0;
        let mut special_count = 0;
        if let Some(map) = body["episodes"].as_object() {
            for (key, raw) in map {
                let mut ep: EpisodeMetadata = serde_json::from_value(raw.clone()).unwrap_or_default();
                ep.episode = key.clone();
                if key.starts_with('S') {
                    special_count += 1;
                } else if key.parse::<i32>().is_ok() {
                    episode_count += 1;
                }
                episodes.insert(key.clone(), ep);
            }
        }
        if episodes.is_empty() {
            return Ok(None);
        }

        let absolute_offset = episodes
            .get("1")
            .and_then(|e| e.absolute_episode_number)
            .map(|abs| (abs - 1).max(0))
            .unwrap_or(0);

        Ok(Some(AnimeMetadata {
            media_id,
            episode_count,
            special_count,
            episodes,
            absolute_offset,
        }))
    }

    /// Filler episode numbers per title. Failure degrades to empty.
    pub async fn filler_data(&self, titles: &[String]) -> HashMap<String, Vec<i32>> {
        let mut out = HashMap::new();
        for title in titles {
            if let Some(cached) = self.cache.get::<Vec<i32>>(BUCKET_FILLER, title) {
                out.insert(title.clone(), cached);
            }
        }
        out
    }

    /// Record filler data fetched by an extension or client.
    pub fn set_filler_data(&self, title: &str, episodes: &[i32]) {
        let _ = self
            .cache
            .set(BUCKET_FILLER, title, &episodes.to_vec(), Some(FILLER_TTL));
    }

    /// Search remote media by title; used to enhance the scanner's media
    /// pool with titles outside the user's list.
    pub async fn search_media(&self, title: &str) -> Vec<BaseMedia> {
        match self.platform.search_media(title).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(title = title, error = %e, "Media search failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_episode_with_offset() {
        let meta = AnimeMetadata {
            media_id: 1,
            episode_count: 12,
            absolute_offset: 24,
            ..Default::default()
        };
        // Absolute numbering: episode 27 is seasonal episode 3
        assert_eq!(meta.normalize_episode(27), 3);
        // Seasonal numbers pass through
        assert_eq!(meta.normalize_episode(5), 5);
    }

    #[test]
    fn test_normalize_without_offset() {
        let meta = AnimeMetadata {
            media_id: 1,
            episode_count: 12,
            absolute_offset: 0,
            ..Default::default()
        };
        assert_eq!(meta.normalize_episode(27), 27);
    }
}
