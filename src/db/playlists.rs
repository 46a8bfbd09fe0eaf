//! Playlists: ordered queues of (media, episode) pairs, stored as blobs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub media_id: i64,
    pub episode: i32,
    #[serde(default)]
    pub path: String,
}

pub struct PlaylistRepository {
    pool: SqlitePool,
}

impl PlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, playlist: &PlaylistRecord) -> Result<i64> {
        let data = serde_json::to_string(&playlist.entries)?;
        let result = sqlx::query("INSERT INTO playlists (name, data) VALUES (?, ?)")
            .bind(&playlist.name)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(&self, playlist: &PlaylistRecord) -> Result<()> {
        let data = serde_json::to_string(&playlist.entries)?;
        sqlx::query("UPDATE playlists SET name = ?, data = ? WHERE id = ?")
            .bind(&playlist.name)
            .bind(data)
            .bind(playlist.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<PlaylistRecord>> {
        let row = sqlx::query("SELECT id, name, data FROM playlists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let data: String = row.get("data");
            PlaylistRecord {
                id: row.get("id"),
                name: row.get("name"),
                entries: serde_json::from_str(&data).unwrap_or_default(),
            }
        }))
    }

    pub async fn list(&self) -> Result<Vec<PlaylistRecord>> {
        let rows = sqlx::query("SELECT id, name, data FROM playlists ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let data: String = row.get("data");
                PlaylistRecord {
                    id: row.get("id"),
                    name: row.get("name"),
                    entries: serde_json::from_str(&data).unwrap_or_default(),
                }
            })
            .collect())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM playlists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
