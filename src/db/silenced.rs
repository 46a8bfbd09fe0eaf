//! Media ids silenced from missing-episode notifications.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

pub struct SilencedRepository {
    pool: SqlitePool,
}

impl SilencedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, media_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO silenced_media (media_id) VALUES (?)")
            .bind(media_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, media_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM silenced_media WHERE media_id = ?")
            .bind(media_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT media_id FROM silenced_media")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("media_id")).collect())
    }
}
