//! Auto-downloader rules, persisted as one JSON blob per row.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// How the comparison title is matched against a release title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleComparison {
    #[default]
    Likely,
    Contains,
    Exact,
}

/// Which episodes a rule is allowed to queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpisodePolicy {
    /// Episodes newer than the user's watch progress
    #[default]
    Recent,
    /// Only the explicitly listed episode numbers
    Selected,
    /// Any episode
    All,
}

/// A persisted predicate selecting which releases to download.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub db_id: i64,
    pub enabled: bool,
    pub media_id: i64,
    /// Allow-list of release groups; empty accepts any.
    #[serde(default)]
    pub release_groups: Vec<String>,
    /// Allow-list of resolutions; empty accepts any.
    #[serde(default)]
    pub resolutions: Vec<String>,
    /// Substrings that must all appear in the release name.
    #[serde(default)]
    pub additional_terms: Vec<String>,
    pub comparison_title: String,
    #[serde(default)]
    pub title_comparison: TitleComparison,
    #[serde(default)]
    pub episode_policy: EpisodePolicy,
    /// Episode numbers for [EpisodePolicy::Selected]. 0 is a valid number
    /// (specials).
    #[serde(default)]
    pub episode_numbers: Vec<i32>,
    /// Absolute destination directory for the torrent client.
    pub destination: String,
}

impl Rule {
    /// Destination must be an absolute path.
    pub fn validate(&self) -> Result<()> {
        if self.media_id == 0 {
            anyhow::bail!("rule has no media");
        }
        if !std::path::Path::new(&self.destination).is_absolute() {
            anyhow::bail!("rule destination must be an absolute path");
        }
        Ok(())
    }
}

pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query("SELECT id, data FROM auto_downloader_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let data: String = row.get("data");
            match serde_json::from_str::<Rule>(&data) {
                Ok(mut rule) => {
                    rule.db_id = id;
                    rules.push(rule);
                }
                Err(e) => tracing::warn!(rule_id = id, error = %e, "Dropping unreadable rule"),
            }
        }
        Ok(rules)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Rule>> {
        let row = sqlx::query("SELECT id, data FROM auto_downloader_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.get("data");
                let mut rule: Rule = serde_json::from_str(&data)?;
                rule.db_id = row.get("id");
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    pub async fn insert(&self, rule: &Rule) -> Result<i64> {
        rule.validate()?;
        let data = serde_json::to_string(rule)?;
        let result = sqlx::query("INSERT INTO auto_downloader_rules (data) VALUES (?)")
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(&self, rule: &Rule) -> Result<()> {
        rule.validate()?;
        let data = serde_json::to_string(rule)?;
        sqlx::query("UPDATE auto_downloader_rules SET data = ? WHERE id = ?")
            .bind(data)
            .bind(rule.db_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM auto_downloader_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn rule() -> Rule {
        Rule {
            enabled: true,
            media_id: 101,
            comparison_title: "Blue Lock".to_string(),
            destination: "/mnt/anime/Blue Lock".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let db = Database::connect_memory().await.unwrap();
        let repo = db.rules();

        let id = repo.insert(&rule()).await.unwrap();
        let mut loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.media_id, 101);
        assert_eq!(loaded.db_id, id);

        loaded.resolutions = vec!["1080p".to_string()];
        repo.update(&loaded).await.unwrap();
        assert_eq!(
            repo.get(id).await.unwrap().unwrap().resolutions,
            vec!["1080p".to_string()]
        );

        repo.delete(id).await.unwrap();
        assert!(repo.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relative_destination_rejected() {
        let db = Database::connect_memory().await.unwrap();
        let mut r = rule();
        r.destination = "downloads/blue-lock".to_string();
        assert!(db.rules().insert(&r).await.is_err());
    }
}
