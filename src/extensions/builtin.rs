//! Built-in native providers
//!
//! Native (in-process) counterparts of script extensions: they implement
//! the same capability traits and are registered under reserved "builtin"
//! manifests. AnimeTosho ships by default so the auto-downloader has a
//! working feed out of the box.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use super::manifest::{ExtensionLanguage, ExtensionManifest, ExtensionType};
use super::provider::{
    AnimeTorrentProvider, ProviderInstance, ProviderSettings, ProviderTorrent, SmartSearchOptions,
};

const ANIMETOSHO_FEED: &str = "https://feed.animetosho.org/json";

pub struct AnimeToshoProvider {
    client: reqwest::Client,
}

impl AnimeToshoProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("kanata")
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn manifest() -> ExtensionManifest {
        ExtensionManifest {
            id: "animetosho".to_string(),
            name: "AnimeTosho".to_string(),
            version: "1.0.0".to_string(),
            manifest_uri: "builtin".to_string(),
            language: ExtensionLanguage::Go,
            kind: ExtensionType::AnimeTorrentProvider,
            description: "AnimeTosho feed and search".to_string(),
            author: "kanata".to_string(),
            permissions: Vec::new(),
            user_config: Vec::new(),
            payload: String::new(),
            payload_uri: String::new(),
        }
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Vec<ProviderTorrent>> {
        let resp = self
            .client
            .get(ANIMETOSHO_FEED)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let items: Vec<serde_json::Value> = resp.json().await.context("Malformed feed")?;
        Ok(items.iter().map(parse_feed_item).collect())
    }
}

fn parse_feed_item(item: &serde_json::Value) -> ProviderTorrent {
    ProviderTorrent {
        name: item["title"].as_str().unwrap_or_default().to_string(),
        link: item["link"].as_str().unwrap_or_default().to_string(),
        magnet: item["magnet_uri"].as_str().unwrap_or_default().to_string(),
        info_hash: item["info_hash_v1"]
            .as_str()
            .or_else(|| item["info_hash"].as_str())
            .unwrap_or_default()
            .to_string(),
        size: item["total_size"].as_u64().unwrap_or(0),
        seeders: item["seeders"].as_i64().unwrap_or(0),
        date: item["timestamp"]
            .as_i64()
            .map(|t| t.to_string())
            .unwrap_or_default(),
        episode_number: None,
        resolution: String::new(),
    }
}

#[async_trait]
impl AnimeTorrentProvider for AnimeToshoProvider {
    async fn search(&self, query: &str) -> Result<Vec<ProviderTorrent>> {
        self.fetch(&[("q", query.to_string()), ("qx", "1".to_string())])
            .await
    }

    async fn smart_search(&self, opts: &SmartSearchOptions) -> Result<Vec<ProviderTorrent>> {
        let mut query = opts.query.clone();
        if query.is_empty() {
            query = opts.titles.first().cloned().unwrap_or_default();
        }
        if let Some(ep) = opts.episode_number {
            query = format!("{query} {ep:02}");
        }
        if !opts.resolution.is_empty() {
            query = format!("{query} {}", opts.resolution);
        }
        self.search(&query).await
    }

    async fn latest(&self) -> Result<Vec<ProviderTorrent>> {
        self.fetch(&[]).await
    }

    async fn info_hash(&self, torrent: &ProviderTorrent) -> Result<String> {
        anyhow::ensure!(!torrent.info_hash.is_empty(), "Feed item carries no info hash");
        Ok(torrent.info_hash.clone())
    }

    async fn magnet_link(&self, torrent: &ProviderTorrent) -> Result<String> {
        anyhow::ensure!(!torrent.magnet.is_empty(), "Feed item carries no magnet");
        Ok(torrent.magnet.clone())
    }

    fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            supports_smart_search: true,
            supports_latest: true,
        }
    }
}

/// Every builtin provider with its manifest.
pub fn builtins() -> Vec<(ExtensionManifest, ProviderInstance)> {
    vec![(
        AnimeToshoProvider::manifest(),
        ProviderInstance::AnimeTorrent(Arc::new(AnimeToshoProvider::new())),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed_item() {
        let raw = serde_json::json!({
            "title": "[Grp] Show - 03 [1080p]",
            "link": "https://animetosho.org/view/1",
            "magnet_uri": "magnet:?xt=urn:btih:abc",
            "info_hash_v1": "abc",
            "total_size": 700_000_000u64,
            "seeders": 40,
            "timestamp": 1700000000,
        });
        let t = parse_feed_item(&raw);
        assert_eq!(t.name, "[Grp] Show - 03 [1080p]");
        assert_eq!(t.info_hash, "abc");
        assert_eq!(t.seeders, 40);
    }

    #[test]
    fn test_builtin_manifest_is_valid() {
        for (manifest, instance) in builtins() {
            manifest.validate().unwrap();
            assert!(manifest.is_builtin());
            assert_eq!(manifest.kind, ExtensionType::AnimeTorrentProvider);
            assert_eq!(instance.kind_name(), "anime-torrent-provider");
        }
    }
}
