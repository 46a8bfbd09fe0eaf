//! Hydrator
//!
//! Attaches episode metadata to matched files: maps the parsed episode to
//! an AniDB episode key via the metadata port, classifies main/special/NC
//! and normalises absolute episode numbers. Metadata failures degrade to
//! parser-only hydration.

use std::collections::HashMap;

use super::matcher::MediaPool;
use super::summary::SummaryLogger;
use crate::library::{LocalFile, LocalFileKind};
use crate::metadata::{AnimeMetadata, MetadataService};

pub struct Hydrator<'a> {
    /// None skips the metadata port entirely (degraded hydration).
    pub metadata: Option<&'a MetadataService>,
    pub pool: &'a MediaPool,
    pub summary: &'a SummaryLogger,
}

impl Hydrator<'_> {
    /// Hydrate every matched file in place.
    pub async fn hydrate(&self, files: &mut [LocalFile]) {
        // One metadata fetch per matched media id.
        let mut metadata_by_id: HashMap<i64, Option<AnimeMetadata>> = HashMap::new();
        for lf in files.iter() {
            if lf.media_id != 0 && !metadata_by_id.contains_key(&lf.media_id) {
                let meta = match self.metadata {
                    Some(service) => service.get_anime_metadata(lf.media_id).await,
                    None => None,
                };
                metadata_by_id.insert(lf.media_id, meta);
            }
        }

        for lf in files.iter_mut() {
            if lf.media_id == 0 {
                continue;
            }
            let meta = metadata_by_id.get(&lf.media_id).and_then(|m| m.as_ref());
            self.hydrate_file(lf, meta);
        }
    }

    fn hydrate_file(&self, lf: &mut LocalFile, meta: Option<&AnimeMetadata>) {
        let media = self.pool.media(lf.media_id);

        if lf.looks_nc() {
            lf.metadata.kind = LocalFileKind::Nc;
            lf.metadata.episode = 0;
            lf.metadata.anidb_episode = String::new();
            self.summary.info(&lf.path, "Classified as NC");
            return;
        }

        if lf.looks_special() {
            let episode = lf.episode_number().unwrap_or(1);
            lf.metadata.kind = LocalFileKind::Special;
            lf.metadata.episode = episode;
            lf.metadata.anidb_episode = format!("S{episode}");
            self.summary.info(&lf.path, format!("Classified as special S{episode}"));
            return;
        }

        // Movies short-circuit to a single episode.
        if media.is_some_and(|m| m.is_movie()) {
            lf.metadata.kind = LocalFileKind::Main;
            lf.metadata.episode = 1;
            lf.metadata.anidb_episode = "1".to_string();
            self.summary.info(&lf.path, "Movie, episode 1");
            return;
        }

        let episode_count = media.map(|m| m.episode_count()).unwrap_or(-1);

        let mut episode = match lf.episode_number() {
            Some(e) => e,
            None => {
                if episode_count == 1 {
                    1
                } else {
                    self.summary
                        .warn(&lf.path, "No episode number parsed, keeping file unhydrated");
                    lf.metadata.kind = LocalFileKind::Main;
                    lf.metadata.episode = 0;
                    lf.metadata.anidb_episode = String::new();
                    return;
                }
            }
        };

        // Absolute episode numbers are brought back into the seasonal range
        // using the metadata offset.
        if episode_count > 0 && episode > episode_count {
            if let Some(meta) = meta {
                let normalized = meta.normalize_episode(episode);
                if normalized != episode {
                    self.summary.info(
                        &lf.path,
                        format!("Normalized absolute episode {episode} to {normalized}"),
                    );
                    episode = normalized;
                }
            }
            if episode > episode_count {
                self.summary.warn(
                    &lf.path,
                    format!("Episode {episode} exceeds known count {episode_count}"),
                );
            }
        }

        lf.metadata.kind = LocalFileKind::Main;
        lf.metadata.episode = episode;
        lf.metadata.anidb_episode = meta
            .and_then(|m| m.episode(&episode.to_string()))
            .map(|e| e.episode.clone())
            .unwrap_or_else(|| episode.to_string());
        self.summary
            .info(&lf.path, format!("Hydrated as main episode {episode}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCacher;
    use crate::db::Database;
    use crate::library::LocalFileKind;
    use crate::platform::{BaseMedia, MediaTitle, Platform};
    use std::path::PathBuf;

    async fn service() -> (tempfile::TempDir, MetadataService) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacher::new(dir.path().to_path_buf()).unwrap();
        let db = Database::connect_memory().await.unwrap();
        let platform = Platform::new(db, cache.clone());
        (dir, MetadataService::new(cache, platform))
    }

    fn media(id: i64, romaji: &str, format: &str, episodes: Option<i32>) -> BaseMedia {
        BaseMedia {
            id,
            title: MediaTitle {
                romaji: romaji.to_string(),
                ..Default::default()
            },
            format: format.to_string(),
            episodes,
            ..Default::default()
        }
    }

    fn file(name: &str, media_id: i64) -> LocalFile {
        let mut lf = LocalFile::new(
            &PathBuf::from(format!("/mnt/anime/{name}")),
            &PathBuf::from("/mnt/anime"),
        );
        lf.media_id = media_id;
        lf
    }

    #[tokio::test]
    async fn test_movie_short_circuits() {
        let (_dir, metadata) = service().await;
        let pool = MediaPool::new(vec![media(1, "Kimi no Na wa", "MOVIE", Some(1))]);
        let summary = SummaryLogger::new();
        let hydrator = Hydrator {
            metadata: Some(&metadata),
            pool: &pool,
            summary: &summary,
        };
        let mut files = vec![file("Kimi no Na wa (2016).mkv", 1)];
        hydrator.hydrate(&mut files).await;
        assert_eq!(files[0].metadata.episode, 1);
        assert_eq!(files[0].metadata.anidb_episode, "1");
        assert_eq!(files[0].metadata.kind, LocalFileKind::Main);
    }

    #[tokio::test]
    async fn test_special_gets_s_key() {
        let (_dir, metadata) = service().await;
        let pool = MediaPool::new(vec![media(1, "Show", "TV", Some(12))]);
        let summary = SummaryLogger::new();
        let hydrator = Hydrator {
            metadata: Some(&metadata),
            pool: &pool,
            summary: &summary,
        };
        let mut files = vec![file("Show - OVA 2.mkv", 1)];
        hydrator.hydrate(&mut files).await;
        assert_eq!(files[0].metadata.kind, LocalFileKind::Special);
        assert_eq!(files[0].metadata.anidb_episode, "S2");
    }

    #[tokio::test]
    async fn test_nc_classification() {
        let (_dir, metadata) = service().await;
        let pool = MediaPool::new(vec![media(1, "Show", "TV", Some(12))]);
        let summary = SummaryLogger::new();
        let hydrator = Hydrator {
            metadata: Some(&metadata),
            pool: &pool,
            summary: &summary,
        };
        let mut files = vec![file("Show - NCOP.mkv", 1)];
        hydrator.hydrate(&mut files).await;
        assert_eq!(files[0].metadata.kind, LocalFileKind::Nc);
    }
}
