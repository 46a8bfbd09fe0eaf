//! Saved extension registry: manifest JSON, payload and grant state per
//! installed extension.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct StoredExtension {
    pub id: String,
    /// JSON-encoded manifest
    pub manifest: String,
    /// Extension source (JS/TS) or empty for Go extensions
    pub payload: String,
    /// "granted" | "pending-grant"
    pub grant_state: String,
    /// JSON object of user-config values
    pub user_config: String,
}

pub struct StoredExtensionRepository {
    pool: SqlitePool,
}

impl StoredExtensionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> StoredExtension {
        StoredExtension {
            id: row.get("id"),
            manifest: row.get("manifest"),
            payload: row.get("payload"),
            grant_state: row.get("grant_state"),
            user_config: row.get("user_config"),
        }
    }

    pub async fn upsert(&self, ext: &StoredExtension) -> Result<()> {
        sqlx::query(
            "INSERT INTO extensions (id, manifest, payload, grant_state, user_config)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                manifest = excluded.manifest,
                payload = excluded.payload,
                grant_state = excluded.grant_state,
                user_config = excluded.user_config",
        )
        .bind(&ext.id)
        .bind(&ext.manifest)
        .bind(&ext.payload)
        .bind(&ext.grant_state)
        .bind(&ext.user_config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredExtension>> {
        let row = sqlx::query("SELECT * FROM extensions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::from_row))
    }

    pub async fn list(&self) -> Result<Vec<StoredExtension>> {
        let rows = sqlx::query("SELECT * FROM extensions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    pub async fn set_grant_state(&self, id: &str, state: &str) -> Result<()> {
        sqlx::query("UPDATE extensions SET grant_state = ? WHERE id = ?")
            .bind(state)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_user_config(&self, id: &str, config: &str) -> Result<()> {
        sqlx::query("UPDATE extensions SET user_config = ? WHERE id = ?")
            .bind(config)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM extensions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
