//! Typed provider capabilities
//!
//! Each provider kind is a capability trait with a closed operation set;
//! the registry maps extension id to (kind, instance) and instances are
//! interchangeable at runtime regardless of implementation language.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A release offered by an anime torrent provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderTorrent {
    pub name: String,
    /// Page or download link
    pub link: String,
    pub magnet: String,
    pub info_hash: String,
    pub size: u64,
    pub seeders: i64,
    pub date: String,
    /// Episode number if the provider already knows it
    pub episode_number: Option<i32>,
    pub resolution: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartSearchOptions {
    pub query: String,
    pub media_id: i64,
    pub episode_number: Option<i32>,
    pub resolution: String,
    pub batch: bool,
    /// Known titles and synonyms of the media
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub supports_smart_search: bool,
    pub supports_latest: bool,
}

#[async_trait]
pub trait AnimeTorrentProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ProviderTorrent>>;

    async fn smart_search(&self, opts: &SmartSearchOptions) -> Result<Vec<ProviderTorrent>>;

    /// Most recent releases across the tracker; the auto-downloader feed.
    async fn latest(&self) -> Result<Vec<ProviderTorrent>>;

    async fn info_hash(&self, torrent: &ProviderTorrent) -> Result<String>;

    async fn magnet_link(&self, torrent: &ProviderTorrent) -> Result<String>;

    fn settings(&self) -> ProviderSettings;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MangaResult {
    pub id: String,
    pub title: String,
    pub url: String,
    pub cover: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterDetails {
    pub id: String,
    pub title: String,
    pub chapter: String,
    pub url: String,
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageDetails {
    pub url: String,
    pub index: u32,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[async_trait]
pub trait MangaProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<MangaResult>>;
    async fn chapters(&self, manga_id: &str) -> Result<Vec<ChapterDetails>>;
    async fn pages(&self, chapter_id: &str) -> Result<Vec<PageDetails>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnlinestreamEpisode {
    pub id: String,
    pub number: i32,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnlinestreamSource {
    pub url: String,
    pub quality: String,
    pub is_m3u8: bool,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[async_trait]
pub trait OnlinestreamProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<MangaResult>>;
    async fn episodes(&self, media_id: &str) -> Result<Vec<OnlinestreamEpisode>>;
    async fn sources(&self, episode_id: &str) -> Result<Vec<OnlinestreamSource>>;
}

/// Custom sources expose a generic method surface to the client.
#[async_trait]
pub trait CustomSourceProvider: Send + Sync {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// A loaded provider instance of whichever kind the manifest declared.
#[derive(Clone)]
pub enum ProviderInstance {
    AnimeTorrent(std::sync::Arc<dyn AnimeTorrentProvider>),
    Manga(std::sync::Arc<dyn MangaProvider>),
    Onlinestream(std::sync::Arc<dyn OnlinestreamProvider>),
    CustomSource(std::sync::Arc<dyn CustomSourceProvider>),
    /// Plugins have lifecycle only, no call surface
    Plugin,
}

impl ProviderInstance {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProviderInstance::AnimeTorrent(_) => "anime-torrent-provider",
            ProviderInstance::Manga(_) => "manga-provider",
            ProviderInstance::Onlinestream(_) => "onlinestream-provider",
            ProviderInstance::CustomSource(_) => "custom-source",
            ProviderInstance::Plugin => "plugin",
        }
    }
}
