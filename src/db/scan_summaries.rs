//! Scan summary blobs, written once per scan and loaded on demand by id.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Row, SqlitePool};

pub struct ScanSummaryRepository {
    pool: SqlitePool,
}

impl ScanSummaryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert<T: Serialize>(&self, summary: &T) -> Result<i64> {
        let data = serde_json::to_string(summary)?;
        let result = sqlx::query("INSERT INTO scan_summaries (data) VALUES (?)")
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get<T: DeserializeOwned>(&self, id: i64) -> Result<Option<T>> {
        let row = sqlx::query("SELECT data FROM scan_summaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.get("data");
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// The most recent summaries, newest first.
    pub async fn recent<T: DeserializeOwned>(&self, limit: i64) -> Result<Vec<(i64, T)>> {
        let rows = sqlx::query("SELECT id, data FROM scan_summaries ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let data: String = row.get("data");
            if let Ok(v) = serde_json::from_str(&data) {
                out.push((id, v));
            }
        }
        Ok(out)
    }
}
