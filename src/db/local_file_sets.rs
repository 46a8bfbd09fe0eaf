//! Versioned local-file set blobs. The current set is the row with the
//! highest id; older rows are pruned but kept around briefly as a safety
//! net against a bad scan.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Row, SqlitePool};

pub struct LocalFileSetRepository {
    pool: SqlitePool,
}

impl LocalFileSetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new version of the set and return its row id.
    pub async fn insert<T: Serialize>(&self, set: &T) -> Result<i64> {
        let data = serde_json::to_string(set)?;
        let result = sqlx::query("INSERT INTO local_file_sets (data) VALUES (?)")
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// The latest persisted set, if any.
    pub async fn latest<T: DeserializeOwned>(&self) -> Result<Option<(i64, T)>> {
        let row = sqlx::query("SELECT id, data FROM local_file_sets ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let id: i64 = row.get("id");
                let data: String = row.get("data");
                Ok(Some((id, serde_json::from_str(&data)?)))
            }
            None => Ok(None),
        }
    }

    /// Delete every version except the `keep` most recent ones.
    pub async fn prune(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM local_file_sets WHERE id NOT IN (
                SELECT id FROM local_file_sets ORDER BY id DESC LIMIT ?
            )",
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn test_latest_is_max_id() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.local_file_sets();

        assert!(repo.latest::<Vec<String>>().await.unwrap().is_none());

        repo.insert(&vec!["a".to_string()]).await.unwrap();
        repo.insert(&vec!["b".to_string()]).await.unwrap();

        let (id, set) = repo.latest::<Vec<String>>().await.unwrap().unwrap();
        assert_eq!(set, vec!["b".to_string()]);
        assert!(id >= 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_latest() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.local_file_sets();
        for i in 0..5 {
            repo.insert(&vec![i]).await.unwrap();
        }
        let removed = repo.prune(2).await.unwrap();
        assert_eq!(removed, 3);
        let (_, set) = repo.latest::<Vec<i32>>().await.unwrap().unwrap();
        assert_eq!(set, vec![4]);
    }
}
