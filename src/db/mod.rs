//! Database connection and repositories
//!
//! A single SQLite database holds settings, rules, queue items, scan
//! summaries, saved extensions, playlists and the versioned local-file set
//! blobs. Polymorphic domain objects are stored as JSON-encoded blob
//! columns to keep migrations simple.

pub mod items;
pub mod local_file_sets;
pub mod playlists;
pub mod rules;
pub mod scan_summaries;
pub mod settings;
pub mod silenced;
pub mod stored_extensions;

use std::path::Path;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use items::{AutoDownloaderItem, ItemRepository, ItemState};
pub use local_file_sets::LocalFileSetRepository;
pub use playlists::{PlaylistRecord, PlaylistRepository};
pub use rules::{EpisodePolicy, Rule, RuleRepository, TitleComparison};
pub use scan_summaries::ScanSummaryRepository;
pub use settings::SettingsRepository;
pub use silenced::SilencedRepository;
pub use stored_extensions::{StoredExtension, StoredExtensionRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the SQLite database at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    pub fn local_file_sets(&self) -> LocalFileSetRepository {
        LocalFileSetRepository::new(self.pool.clone())
    }

    pub fn rules(&self) -> RuleRepository {
        RuleRepository::new(self.pool.clone())
    }

    pub fn items(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone())
    }

    pub fn scan_summaries(&self) -> ScanSummaryRepository {
        ScanSummaryRepository::new(self.pool.clone())
    }

    pub fn extensions(&self) -> StoredExtensionRepository {
        StoredExtensionRepository::new(self.pool.clone())
    }

    pub fn playlists(&self) -> PlaylistRepository {
        PlaylistRepository::new(self.pool.clone())
    }

    pub fn silenced(&self) -> SilencedRepository {
        SilencedRepository::new(self.pool.clone())
    }

    /// Create tables when missing. Statements are idempotent so this runs on
    /// every startup.
    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS local_file_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS auto_downloader_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS auto_downloader_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                media_id INTEGER NOT NULL,
                episode INTEGER NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                hash TEXT NOT NULL DEFAULT '',
                magnet TEXT NOT NULL DEFAULT '',
                torrent_name TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE INDEX IF NOT EXISTS idx_adi_media ON auto_downloader_items (media_id)",
            "CREATE TABLE IF NOT EXISTS scan_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS extensions (
                id TEXT PRIMARY KEY,
                manifest TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '',
                grant_state TEXT NOT NULL DEFAULT 'granted',
                user_config TEXT NOT NULL DEFAULT '{}',
                installed_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS silenced_media (
                media_id INTEGER PRIMARY KEY
            )",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}
