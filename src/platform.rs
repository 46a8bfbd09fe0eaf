//! AniList mirror
//!
//! Mirrors the user's remote anime list: the collection is fetched over the
//! AniList GraphQL API and cached in a file-cache bucket. When the remote
//! service is unreachable the last cached snapshot is served instead, so
//! the rest of the server keeps working offline. Progress updates require a
//! token and are skipped (with a warning) without one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::FileCacher;
use crate::db::Database;

const ANILIST_API: &str = "https://graphql.anilist.co";
const CACHE_BUCKET: &str = "anilist";
const COLLECTION_KEY: &str = "collection";
const COLLECTION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaTitle {
    #[serde(default)]
    pub romaji: String,
    #[serde(default)]
    pub english: String,
    #[serde(default)]
    pub native: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAiringEpisode {
    pub episode: i32,
    pub airing_at: i64,
}

/// A media entry as mirrored from the remote list service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseMedia {
    pub id: i64,
    #[serde(default)]
    pub title: MediaTitle,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// TV | MOVIE | OVA | ONA | SPECIAL | MUSIC
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub episodes: Option<i32>,
    #[serde(default)]
    pub season_year: Option<i32>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub next_airing_episode: Option<NextAiringEpisode>,
}

impl BaseMedia {
    /// Every known title and synonym, deduplicated, for matching.
    pub fn all_titles(&self) -> Vec<String> {
        let mut titles = Vec::new();
        for t in [&self.title.romaji, &self.title.english, &self.title.native] {
            if !t.is_empty() && !titles.contains(t) {
                titles.push(t.clone());
            }
        }
        for s in &self.synonyms {
            if !s.is_empty() && !titles.contains(s) {
                titles.push(s.clone());
            }
        }
        titles
    }

    pub fn is_movie(&self) -> bool {
        self.format.eq_ignore_ascii_case("movie")
    }

    /// Known episode count; -1 when the remote does not know yet.
    pub fn episode_count(&self) -> i32 {
        self.episodes.unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub media: BaseMedia,
    /// CURRENT | PLANNING | COMPLETED | DROPPED | PAUSED | REPEATING
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub repeat: i32,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimeCollection {
    pub entries: Vec<ListEntry>,
}

impl AnimeCollection {
    pub fn entry(&self, media_id: i64) -> Option<&ListEntry> {
        self.entries.iter().find(|e| e.media.id == media_id)
    }

    pub fn media(&self, media_id: i64) -> Option<&BaseMedia> {
        self.entry(media_id).map(|e| &e.media)
    }

    pub fn all_media(&self) -> impl Iterator<Item = &BaseMedia> {
        self.entries.iter().map(|e| &e.media)
    }
}

/// Handle to the mirrored list. Cheap to clone.
#[derive(Clone)]
pub struct Platform {
    client: reqwest::Client,
    cache: FileCacher,
    db: Database,
    /// Last good collection, also used when both network and disk cache miss.
    memory: Arc<RwLock<Option<AnimeCollection>>>,
}

impl Platform {
    pub fn new(db: Database, cache: FileCacher) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            cache,
            db,
            memory: Arc::new(RwLock::new(None)),
        }
    }

    /// The user's anime collection. `force` bypasses the TTL cache. Network
    /// failures degrade to the cached snapshot.
    pub async fn anime_collection(&self, force: bool) -> Result<AnimeCollection> {
        if !force {
            if let Some(cached) = self.cache.get::<AnimeCollection>(CACHE_BUCKET, COLLECTION_KEY) {
                *self.memory.write() = Some(cached.clone());
                return Ok(cached);
            }
        }

        match self.fetch_collection().await {
            Ok(collection) => {
                let _ = self
                    .cache
                    .set(CACHE_BUCKET, COLLECTION_KEY, &collection, Some(COLLECTION_TTL));
                *self.memory.write() = Some(collection.clone());
                Ok(collection)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch anime collection, serving cached snapshot");
                if let Some(snapshot) = self.memory.read().clone() {
                    return Ok(snapshot);
                }
                // Expired disk entries are gone, but an unexpired one may
                // still exist if force was set.
                if let Some(cached) = self.cache.get::<AnimeCollection>(CACHE_BUCKET, COLLECTION_KEY)
                {
                    return Ok(cached);
                }
                Err(e)
            }
        }
    }

    async fn fetch_collection(&self) -> Result<AnimeCollection> {
        let settings = self.db.settings().get().await?;
        let username = settings.anilist.username.clone();
        if username.is_empty() {
            // No account configured: an empty mirror, not an error.
            return Ok(AnimeCollection::default());
        }

        let query = r#"
            query ($userName: String) {
              MediaListCollection(userName: $userName, type: ANIME) {
                lists {
                  entries {
                    status
                    score
                    progress
                    repeat
                    media {
                      id
                      title { romaji english native }
                      synonyms
                      format
                      episodes
                      seasonYear
                      status
                      nextAiringEpisode { episode airingAt }
                    }
                  }
                }
              }
            }"#;

        let mut req = self
            .client
            .post(ANILIST_API)
            .json(&json!({ "query": query, "variables": { "userName": username } }));
        if !settings.anilist.token.is_empty() {
            req = req.bearer_auth(&settings.anilist.token);
        }

        let resp = req.send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;

        let mut entries = Vec::new();
        let lists = body["data"]["MediaListCollection"]["lists"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for list in lists {
            for entry in list["entries"].as_array().cloned().unwrap_or_default() {
                let media: BaseMedia = serde_json::from_value(normalize_media(&entry["media"]))
                    .unwrap_or_default();
                if media.id == 0 {
                    continue;
                }
                entries.push(ListEntry {
                    media,
                    status: entry["status"].as_str().unwrap_or_default().to_string(),
                    score: entry["score"].as_f64().unwrap_or(0.0),
                    progress: entry["progress"].as_i64().unwrap_or(0) as i32,
                    repeat: entry["repeat"].as_i64().unwrap_or(0) as i32,
                    started_at: None,
                    completed_at: None,
                });
            }
        }

        Ok(AnimeCollection { entries })
    }

    /// Search remote media by title (used by enhanced scanning).
    pub async fn search_media(&self, title: &str) -> Result<Vec<BaseMedia>> {
        let query = r#"
            query ($search: String) {
              Page(perPage: 10) {
                media(search: $search, type: ANIME) {
                  id
                  title { romaji english native }
                  synonyms
                  format
                  episodes
                  seasonYear
                  status
                }
              }
            }"#;

        let resp = self
            .client
            .post(ANILIST_API)
            .json(&json!({ "query": query, "variables": { "search": title } }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;

        let media = body["data"]["Page"]["media"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(media
            .iter()
            .filter_map(|m| serde_json::from_value(normalize_media(m)).ok())
            .filter(|m: &BaseMedia| m.id != 0)
            .collect())
    }

    /// Push a progress update to the remote list. Requires a token; without
    /// one the update is recorded locally only.
    pub async fn update_progress(&self, media_id: i64, progress: i32) -> Result<()> {
        let settings = self.db.settings().get().await?;
        if settings.anilist.token.is_empty() {
            tracing::warn!(
                media_id = media_id,
                "No AniList token configured, progress update kept local"
            );
            self.bump_cached_progress(media_id, progress);
            return Ok(());
        }

        let query = r#"
            mutation ($mediaId: Int, $progress: Int) {
              SaveMediaListEntry(mediaId: $mediaId, progress: $progress) { id progress }
            }"#;

        self.client
            .post(ANILIST_API)
            .bearer_auth(&settings.anilist.token)
            .json(&json!({ "query": query, "variables": { "mediaId": media_id, "progress": progress } }))
            .send()
            .await
            .context("Failed to send progress update")?
            .error_for_status()
            .context("Progress update rejected")?;

        self.bump_cached_progress(media_id, progress);
        tracing::info!(media_id = media_id, progress = progress, "Updated list progress");
        Ok(())
    }

    fn bump_cached_progress(&self, media_id: i64, progress: i32) {
        let mut guard = self.memory.write();
        if let Some(collection) = guard.as_mut() {
            if let Some(entry) = collection.entries.iter_mut().find(|e| e.media.id == media_id) {
                entry.progress = entry.progress.max(progress);
            }
            let _ = self
                .cache
                .set(CACHE_BUCKET, COLLECTION_KEY, collection, Some(COLLECTION_TTL));
        }
    }
}

/// AniList returns camelCase fields but media titles nested; flatten the
/// nullable values our struct defaults cover.
fn normalize_media(value: &serde_json::Value) -> serde_json::Value {
    let mut m = value.clone();
    if m["title"].is_null() {
        m["title"] = json!({});
    }
    for key in ["romaji", "english", "native"] {
        if m["title"][key].is_null() {
            m["title"][key] = json!("");
        }
    }
    if m["synonyms"].is_null() {
        m["synonyms"] = json!([]);
    }
    if m["format"].is_null() {
        m["format"] = json!("");
    }
    if m["status"].is_null() {
        m["status"] = json!("");
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_titles_dedup() {
        let media = BaseMedia {
            id: 1,
            title: MediaTitle {
                romaji: "Bocchi the Rock!".into(),
                english: "Bocchi the Rock!".into(),
                native: "ぼっち・ざ・ろっく！".into(),
            },
            synonyms: vec!["BTR".into()],
            ..Default::default()
        };
        let titles = media.all_titles();
        assert_eq!(titles.len(), 3);
    }

    #[test]
    fn test_normalize_media_fills_nulls() {
        let raw = serde_json::json!({ "id": 5, "title": null, "synonyms": null });
        let media: BaseMedia = serde_json::from_value(normalize_media(&raw)).unwrap();
        assert_eq!(media.id, 5);
        assert!(media.synonyms.is_empty());
    }
}
