//! Application configuration management
//!
//! Startup configuration comes from environment variables (a `.env` file is
//! honoured). Everything that can change at runtime lives in the settings
//! row instead (see [crate::db::SettingsRepository]).

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: String,

    /// Server port
    pub port: u16,

    /// Data directory holding the database, caches and payload store
    pub data_dir: PathBuf,

    /// SQLite database path
    pub database_path: PathBuf,

    /// Log directory override (KANATA_LOG_DIR). Defaults to `<data_dir>/logs`.
    pub log_dir: PathBuf,

    /// Directory for transcode output and extracted attachments
    pub transcode_dir: PathBuf,

    /// Download root for the streaming torrent session
    pub torrent_stream_dir: PathBuf,

    /// Directory for the file cache buckets
    pub cache_dir: PathBuf,

    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Path to the ffprobe binary
    pub ffprobe_path: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("KANATA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kanata")
            });

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("kanata.db"));

        let log_dir = env::var("KANATA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs"));

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "43211".to_string())
                .parse()
                .context("Invalid PORT")?,

            transcode_dir: env::var("KANATA_TRANSCODE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("transcode")),

            torrent_stream_dir: env::var("KANATA_TORRENTSTREAM_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("torrentstream")),

            cache_dir: env::var("KANATA_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("cache")),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            data_dir,
            database_path,
            log_dir,
        })
    }

    /// Create every directory the server writes to.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.log_dir,
            &self.transcode_dir,
            &self.torrent_stream_dir,
            &self.cache_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Runtime-mutable server settings, stored as a JSON blob in the settings row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Library root directories (absolute paths)
    pub library_paths: Vec<String>,
    /// Server password. Empty disables the auth gate.
    pub password: String,
    /// Matching threshold used by the scanner (0..1)
    pub matching_threshold: f64,
    /// Matching algorithm: "levenshtein" | "jaro-winkler" | "sorensen-dice"
    pub matching_algorithm: String,
    /// Resolve unknown folder titles against the metadata search
    pub enhanced_scanning: bool,
    /// Skip ignored files when rescanning
    pub skip_ignored_files: bool,
    /// React to acquisition/filesystem activity with debounced scans
    pub auto_scan_enabled: bool,

    pub anilist: AnilistSettings,
    pub auto_downloader: AutoDownloaderSettings,
    pub torrent_client: TorrentClientSettings,
    pub torrent_stream: TorrentStreamSettings,
    pub media_stream: MediaStreamSettings,
    pub debrid: DebridSettings,
    pub nakama: NakamaSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            library_paths: Vec::new(),
            password: String::new(),
            matching_threshold: 0.5,
            matching_algorithm: "sorensen-dice".to_string(),
            enhanced_scanning: false,
            skip_ignored_files: true,
            auto_scan_enabled: false,
            anilist: AnilistSettings::default(),
            auto_downloader: AutoDownloaderSettings::default(),
            torrent_client: TorrentClientSettings::default(),
            torrent_stream: TorrentStreamSettings::default(),
            media_stream: MediaStreamSettings::default(),
            debrid: DebridSettings::default(),
            nakama: NakamaSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnilistSettings {
    /// AniList username whose lists are mirrored
    pub username: String,
    /// OAuth token used for progress updates. Empty = read-only mirror.
    pub token: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoDownloaderSettings {
    pub enabled: bool,
    /// Minutes between runs. Values below 15 are clamped to 15.
    pub interval: u64,
    /// Provider extension id used for the release feed
    pub provider: String,
    pub enhanced_queries: bool,
    /// Hand magnets to the debrid service instead of the torrent client
    pub use_debrid: bool,
    /// Days a queue item is kept before being purged
    pub item_retention_days: i64,
}

impl Default for AutoDownloaderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 20,
            provider: String::new(),
            enhanced_queries: false,
            use_debrid: false,
            item_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TorrentClientSettings {
    pub download_dir: String,
    pub enable_dht: bool,
    pub listen_port: u16,
}

impl Default for TorrentClientSettings {
    fn default() -> Self {
        Self {
            download_dir: String::new(),
            enable_dht: true,
            listen_port: 0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TorrentStreamSettings {
    pub enabled: bool,
    /// Completion percentage under which a stopped stream drops its data
    pub drop_threshold: f64,
    /// Preferred resolution for auto file selection, e.g. "1080"
    pub preferred_resolution: String,
}

impl Default for TorrentStreamSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            drop_threshold: 70.0,
            preferred_resolution: String::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaStreamSettings {
    pub transcode_enabled: bool,
    /// Disk budget for transcode output, in MiB
    pub transcode_disk_budget_mib: u64,
}

impl Default for MediaStreamSettings {
    fn default() -> Self {
        Self {
            transcode_enabled: false,
            transcode_disk_budget_mib: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebridSettings {
    pub enabled: bool,
    pub provider: String,
    /// Encrypted API key (aes-gcm, base64). See [crate::debrid::CredentialVault].
    pub encrypted_api_key: String,
    pub nonce: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NakamaSettings {
    /// Accept inbound peer connections
    pub host_enabled: bool,
    /// Shared password required from peers
    pub host_password: String,
    /// Media ids excluded from the shared library snapshot
    pub unshared_media_ids: Vec<i64>,
    /// Connect as a peer to this host URL (e.g. "ws://host:43211")
    pub remote_url: String,
    /// Password presented to the remote host
    pub remote_password: String,
    pub username: String,
}

impl Default for NakamaSettings {
    fn default() -> Self {
        Self {
            host_enabled: false,
            host_password: String::new(),
            unshared_media_ids: Vec::new(),
            remote_url: String::new(),
            remote_password: String::new(),
            username: String::new(),
        }
    }
}
