//! Settings repository: a single runtime-mutable row holding the server
//! settings as a JSON blob.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Settings;

pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the settings row, falling back to defaults when absent or
    /// unreadable.
    pub async fn get(&self) -> Result<Settings> {
        let row = sqlx::query("SELECT data FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let data: String = row.get("data");
                serde_json::from_str(&data).unwrap_or_default()
            }
            None => Settings::default(),
        })
    }

    pub async fn save(&self, settings: &Settings) -> Result<()> {
        let data = serde_json::to_string(settings)?;
        sqlx::query(
            "INSERT INTO settings (id, data) VALUES (1, ?)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
        )
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.settings();

        let mut settings = repo.get().await.unwrap();
        assert!(settings.library_paths.is_empty());

        settings.library_paths = vec!["/mnt/anime".to_string()];
        settings.auto_downloader.enabled = true;
        repo.save(&settings).await.unwrap();

        let loaded = repo.get().await.unwrap();
        assert_eq!(loaded.library_paths, vec!["/mnt/anime".to_string()]);
        assert!(loaded.auto_downloader.enabled);
    }
}
