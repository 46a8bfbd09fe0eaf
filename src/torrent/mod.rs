//! Torrent client port
//!
//! Abstract contract over torrent backends. The embedded librqbit session
//! is the default implementation; the same contract would fit an external
//! qBittorrent-like client.

pub mod client;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::RqbitClient;

/// Unified torrent state across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentState {
    Downloading,
    Seeding,
    Paused,
    Queued,
    Error,
    Checking,
    Moving,
    Unknown,
}

impl std::fmt::Display for TorrentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Queued => "queued",
            TorrentState::Error => "error",
            TorrentState::Checking => "checking",
            TorrentState::Moving => "moving",
            TorrentState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Unified view of a managed torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentView {
    pub name: String,
    pub hash: String,
    /// 0..1
    pub progress: f64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub eta_seconds: Option<u64>,
    pub state: TorrentState,
    pub size: u64,
    pub content_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentFileView {
    pub index: usize,
    pub path: String,
    pub size: u64,
    pub progress: f64,
}

/// Outcome of a smart select: which files were enabled for which episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSelection {
    pub hash: String,
    pub enabled_files: Vec<TorrentFileView>,
    /// Episodes no file could be mapped to
    pub missing_episodes: Vec<i32>,
}

/// Contract shared by every torrent client backend.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Add magnets, downloading into `dest`.
    async fn add_magnets(&self, magnets: &[String], dest: &Path) -> Result<()>;

    async fn list(&self) -> Result<Vec<TorrentView>>;

    async fn get(&self, hash: &str) -> Result<Option<TorrentView>>;

    async fn pause(&self, hashes: &[String]) -> Result<()>;

    async fn resume(&self, hashes: &[String]) -> Result<()>;

    async fn remove(&self, hashes: &[String], delete_files: bool) -> Result<()>;

    async fn exists(&self, hash: &str) -> Result<bool>;

    async fn files(&self, hash: &str) -> Result<Vec<TorrentFileView>>;

    /// Fetch the file list before downloading, enable only the files whose
    /// parsed episodes match, then start the torrent.
    async fn smart_select(
        &self,
        magnet: &str,
        episode_numbers: &[i32],
        dest: &Path,
    ) -> Result<SmartSelection>;
}

/// Extract the v1 info hash from a magnet link, lowercased.
pub fn magnet_info_hash(magnet: &str) -> Option<String> {
    let url = url::Url::parse(magnet).ok()?;
    for (key, value) in url.query_pairs() {
        if key == "xt" {
            if let Some(hash) = value.strip_prefix("urn:btih:") {
                return Some(hash.to_lowercase());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_info_hash() {
        let magnet = "magnet:?xt=urn:btih:C9E15763F722F23E98A29DECDFAE341B98D53056&dn=Example";
        assert_eq!(
            magnet_info_hash(magnet).as_deref(),
            Some("c9e15763f722f23e98a29decdfae341b98d53056")
        );
        assert_eq!(magnet_info_hash("not a magnet"), None);
    }
}
