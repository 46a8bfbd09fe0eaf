//! Auto-downloader queue items: deduplication records for releases the
//! downloader has already handled. Keyed by `(rule, episode, torrent name)`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Added,
    Completed,
    Errored,
    Removed,
}

impl ItemState {
    fn as_str(&self) -> &'static str {
        match self {
            ItemState::Added => "added",
            ItemState::Completed => "completed",
            ItemState::Errored => "errored",
            ItemState::Removed => "removed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => ItemState::Completed,
            "errored" => ItemState::Errored,
            "removed" => ItemState::Removed,
            _ => ItemState::Added,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoDownloaderItem {
    pub id: i64,
    pub rule_id: i64,
    pub media_id: i64,
    pub episode: i32,
    pub link: String,
    pub hash: String,
    pub magnet: String,
    pub torrent_name: String,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
}

pub struct ItemRepository {
    pool: SqlitePool,
}

impl ItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> AutoDownloaderItem {
        let state: String = row.get("state");
        let created_at: String = row.get("created_at");
        AutoDownloaderItem {
            id: row.get("id"),
            rule_id: row.get("rule_id"),
            media_id: row.get("media_id"),
            episode: row.get("episode"),
            link: row.get("link"),
            hash: row.get("hash"),
            magnet: row.get("magnet"),
            torrent_name: row.get("torrent_name"),
            state: ItemState::parse(&state),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }

    pub async fn insert(
        &self,
        rule_id: i64,
        media_id: i64,
        episode: i32,
        link: &str,
        hash: &str,
        magnet: &str,
        torrent_name: &str,
        state: ItemState,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO auto_downloader_items
             (rule_id, media_id, episode, link, hash, magnet, torrent_name, state, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule_id)
        .bind(media_id)
        .bind(episode)
        .bind(link)
        .bind(hash)
        .bind(magnet)
        .bind(torrent_name)
        .bind(state.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list(&self) -> Result<Vec<AutoDownloaderItem>> {
        let rows = sqlx::query("SELECT * FROM auto_downloader_items ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    pub async fn list_by_media(&self, media_id: i64) -> Result<Vec<AutoDownloaderItem>> {
        let rows = sqlx::query("SELECT * FROM auto_downloader_items WHERE media_id = ?")
            .bind(media_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    /// True when the same release was already queued for this rule. This is
    /// the dedup gate making rule cycles idempotent.
    pub async fn exists(&self, rule_id: i64, episode: i32, torrent_name: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM auto_downloader_items
             WHERE rule_id = ? AND episode = ? AND torrent_name = ? AND state != 'removed'",
        )
        .bind(rule_id)
        .bind(episode)
        .bind(torrent_name)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    pub async fn set_state(&self, id: i64, state: ItemState) -> Result<()> {
        sqlx::query("UPDATE auto_downloader_items SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove completed items; called after a scan has picked up the files.
    pub async fn delete_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auto_downloader_items WHERE state = 'completed'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Purge items older than the retention window.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auto_downloader_items WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_dedup_gate() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.items();

        assert!(!repo.exists(1, 3, "[Group] Show - 03").await.unwrap());
        repo.insert(1, 101, 3, "", "", "", "[Group] Show - 03", ItemState::Added)
            .await
            .unwrap();
        assert!(repo.exists(1, 3, "[Group] Show - 03").await.unwrap());
        // Same name, different episode: not a duplicate
        assert!(!repo.exists(1, 4, "[Group] Show - 03").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_transition_and_purge() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.items();
        let id = repo
            .insert(1, 101, 3, "", "", "", "x", ItemState::Added)
            .await
            .unwrap();
        repo.set_state(id, ItemState::Completed).await.unwrap();
        assert_eq!(repo.list().await.unwrap()[0].state, ItemState::Completed);

        let purged = repo
            .purge_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
