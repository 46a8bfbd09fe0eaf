//! Embedded torrent client backed by a librqbit session.
//!
//! The session persists resume data under the session directory and is
//! restored on startup. A background monitor publishes progress events to
//! the bus once per second.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::dht::PersistentDhtConfig;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions};

use super::{SmartSelection, TorrentClient, TorrentFileView, TorrentState, TorrentView};
use crate::events::{EventBus, WsEvent};
use crate::parser;

/// Info hash of a handle as lowercase hex.
fn info_hash_hex<T: AsRef<ManagedTorrent>>(handle: &T) -> String {
    handle
        .as_ref()
        .info_hash()
        .0
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct RqbitClientConfig {
    pub download_dir: PathBuf,
    pub session_dir: PathBuf,
    pub enable_dht: bool,
    pub listen_port: u16,
}

pub struct RqbitClient {
    session: Arc<Session>,
    config: RqbitClientConfig,
}

impl RqbitClient {
    pub async fn new(config: RqbitClientConfig, events: EventBus) -> Result<Self> {
        tokio::fs::create_dir_all(&config.download_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.download_dir.display()))?;
        tokio::fs::create_dir_all(&config.session_dir).await.ok();

        let dht_config = if config.enable_dht {
            Some(PersistentDhtConfig {
                config_filename: Some(config.session_dir.join("dht.json")),
                ..Default::default()
            })
        } else {
            None
        };

        let session_opts = SessionOptions {
            disable_dht: !config.enable_dht,
            disable_dht_persistence: !config.enable_dht,
            dht_config,
            persistence: Some(librqbit::SessionPersistenceConfig::Json {
                folder: Some(config.session_dir.clone()),
            }),
            listen_port_range: if config.listen_port > 0 {
                Some(config.listen_port..config.listen_port + 1)
            } else {
                None
            },
            ..Default::default()
        };

        let session = Session::new_with_opts(config.download_dir.clone(), session_opts)
            .await
            .context("Failed to create torrent session")?;

        tracing::info!(
            download_dir = %config.download_dir.display(),
            "Torrent client initialized"
        );

        let client = Self { session, config };
        client.start_progress_monitor(events);
        Ok(client)
    }

    fn handle_by_hash(&self, hash: &str) -> Option<(usize, Arc<ManagedTorrent>)> {
        let hash = hash.to_lowercase();
        self.session.with_torrents(|iter| {
            for (id, handle) in iter {
                if info_hash_hex(&handle) == hash {
                    return Some((id, handle.clone()));
                }
            }
            None
        })
    }

    fn view_for(&self, handle: &Arc<ManagedTorrent>) -> TorrentView {
        let stats = handle.stats();
        let progress = stats.progress_bytes as f64 / stats.total_bytes.max(1) as f64;

        let (download_speed, upload_speed) = stats
            .live
            .as_ref()
            .map(|live| {
                (
                    (live.download_speed.mbps * 125_000.0) as u64,
                    (live.upload_speed.mbps * 125_000.0) as u64,
                )
            })
            .unwrap_or((0, 0));

        let eta_seconds = if download_speed > 0 && stats.total_bytes > stats.progress_bytes {
            Some((stats.total_bytes - stats.progress_bytes) / download_speed)
        } else {
            None
        };

        let state = {
            use librqbit::TorrentStatsState;
            match &stats.state {
                TorrentStatsState::Paused => TorrentState::Paused,
                TorrentStatsState::Initializing => TorrentState::Checking,
                TorrentStatsState::Live if progress >= 1.0 => TorrentState::Seeding,
                TorrentStatsState::Live => TorrentState::Downloading,
                TorrentStatsState::Error => TorrentState::Error,
            }
        };

        let name = handle.name().unwrap_or_else(|| "Unknown".to_string());
        TorrentView {
            content_path: self.config.download_dir.join(&name).to_string_lossy().to_string(),
            name,
            hash: info_hash_hex(handle),
            progress,
            download_speed,
            upload_speed,
            eta_seconds,
            state,
            size: stats.total_bytes,
        }
    }

    fn files_for(&self, handle: &Arc<ManagedTorrent>) -> Vec<TorrentFileView> {
        let mut files = Vec::new();
        if let Some(metadata) = handle.metadata.load_full() {
            let stats = handle.stats();
            for (idx, file_info) in metadata.file_infos.iter().enumerate() {
                let done = stats.file_progress.get(idx).copied().unwrap_or(0);
                let size = file_info.len;
                files.push(TorrentFileView {
                    index: idx,
                    path: file_info.relative_filename.to_string_lossy().to_string(),
                    size,
                    progress: if size > 0 {
                        (done as f64 / size as f64).min(1.0)
                    } else {
                        0.0
                    },
                });
            }
        }
        files
    }

    fn start_progress_monitor(&self, events: EventBus) {
        let session = self.session.clone();
        let download_dir = self.config.download_dir.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut completed: HashSet<String> = HashSet::new();
            loop {
                interval.tick().await;
                let handles: Vec<(usize, Arc<ManagedTorrent>)> =
                    session.with_torrents(|iter| iter.map(|(id, h)| (id, h.clone())).collect());
                if handles.is_empty() {
                    continue;
                }
                let mut views = Vec::with_capacity(handles.len());
                for (_, handle) in &handles {
                    let stats = handle.stats();
                    let hash = info_hash_hex(handle);
                    let progress = stats.progress_bytes as f64 / stats.total_bytes.max(1) as f64;
                    if progress >= 1.0 && completed.insert(hash.clone()) {
                        events.notify(
                            "success",
                            format!(
                                "Downloaded {}",
                                handle.name().unwrap_or_else(|| hash.clone())
                            ),
                        );
                    }
                    views.push(serde_json::json!({
                        "name": handle.name(),
                        "hash": hash,
                        "progress": progress,
                        "contentPath": download_dir.to_string_lossy(),
                    }));
                }
                events.send(WsEvent::TorrentClientProgress(serde_json::Value::Array(views)));
            }
        });
    }

    async fn add_one(&self, magnet: &str, dest: &Path, paused: bool) -> Result<Arc<ManagedTorrent>> {
        let opts = AddTorrentOptions {
            paused,
            output_folder: Some(dest.to_string_lossy().to_string()),
            overwrite: true,
            ..Default::default()
        };
        let response = self
            .session
            .add_torrent(AddTorrent::from_url(magnet), Some(opts))
            .await
            .context("Failed to add torrent")?;

        match response {
            AddTorrentResponse::Added(_, handle) => Ok(handle),
            AddTorrentResponse::AlreadyManaged(_, handle) => Ok(handle),
            AddTorrentResponse::ListOnly(_) => anyhow::bail!("Torrent was added in list-only mode"),
        }
    }
}

#[async_trait]
impl TorrentClient for RqbitClient {
    async fn add_magnets(&self, magnets: &[String], dest: &Path) -> Result<()> {
        for magnet in magnets {
            let handle = self.add_one(magnet, dest, false).await?;
            tracing::info!(hash = %info_hash_hex(&handle), "Added torrent");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TorrentView>> {
        let handles: Vec<Arc<ManagedTorrent>> = self
            .session
            .with_torrents(|iter| iter.map(|(_, h)| h.clone()).collect());
        Ok(handles.iter().map(|h| self.view_for(h)).collect())
    }

    async fn get(&self, hash: &str) -> Result<Option<TorrentView>> {
        Ok(self.handle_by_hash(hash).map(|(_, h)| self.view_for(&h)))
    }

    async fn pause(&self, hashes: &[String]) -> Result<()> {
        for hash in hashes {
            if let Some((_, handle)) = self.handle_by_hash(hash) {
                self.session
                    .pause(&handle)
                    .await
                    .with_context(|| format!("Failed to pause {hash}"))?;
            }
        }
        Ok(())
    }

    async fn resume(&self, hashes: &[String]) -> Result<()> {
        for hash in hashes {
            if let Some((_, handle)) = self.handle_by_hash(hash) {
                self.session
                    .unpause(&handle)
                    .await
                    .with_context(|| format!("Failed to resume {hash}"))?;
            }
        }
        Ok(())
    }

    async fn remove(&self, hashes: &[String], delete_files: bool) -> Result<()> {
        for hash in hashes {
            if let Some((id, _)) = self.handle_by_hash(hash) {
                self.session
                    .delete(TorrentIdOrHash::Id(id), delete_files)
                    .await
                    .with_context(|| format!("Failed to remove {hash}"))?;
                tracing::info!(hash = %hash, delete_files = delete_files, "Removed torrent");
            }
        }
        Ok(())
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.handle_by_hash(hash).is_some())
    }

    async fn files(&self, hash: &str) -> Result<Vec<TorrentFileView>> {
        let (_, handle) = self
            .handle_by_hash(hash)
            .with_context(|| format!("Torrent not found: {hash}"))?;
        Ok(self.files_for(&handle))
    }

    async fn smart_select(
        &self,
        magnet: &str,
        episode_numbers: &[i32],
        dest: &Path,
    ) -> Result<SmartSelection> {
        // Add paused so nothing downloads until the selection is applied.
        let handle = self.add_one(magnet, dest, true).await?;
        handle
            .wait_until_initialized()
            .await
            .context("Torrent did not initialize")?;

        let files = self.files_for(&handle);
        let (enabled, missing) = select_episode_files(&files, episode_numbers);

        if enabled.is_empty() {
            let hash = info_hash_hex(&handle);
            self.remove(&[hash], true).await.ok();
            anyhow::bail!("Smart select matched no files for the requested episodes");
        }

        let indices: HashSet<usize> = enabled.iter().map(|f| f.index).collect();
        self.session
            .update_only_files(&handle, &indices)
            .await
            .context("Failed to apply file selection")?;
        self.session
            .unpause(&handle)
            .await
            .context("Failed to start torrent after selection")?;

        let hash = info_hash_hex(&handle);
        tracing::info!(
            hash = %hash,
            enabled = enabled.len(),
            total = files.len(),
            "Smart select enabled matching files"
        );
        Ok(SmartSelection {
            hash,
            enabled_files: enabled,
            missing_episodes: missing,
        })
    }
}

/// Map torrent files to episodes via the filename parser and keep only the
/// requested ones. Non-video files are never enabled.
fn select_episode_files(
    files: &[TorrentFileView],
    episode_numbers: &[i32],
) -> (Vec<TorrentFileView>, Vec<i32>) {
    let mut enabled = Vec::new();
    let mut found: HashSet<i32> = HashSet::new();

    for file in files {
        let name = file.path.rsplit('/').next().unwrap_or(&file.path);
        let parsed = parser::parse(name);
        if parsed.extension.is_empty() {
            continue;
        }
        let Some(episode) = parsed.episode_number() else {
            continue;
        };
        if episode_numbers.contains(&episode) {
            enabled.push(file.clone());
            found.insert(episode);
        }
    }

    let missing = episode_numbers
        .iter()
        .copied()
        .filter(|e| !found.contains(e))
        .collect();
    (enabled, missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(index: usize, path: &str) -> TorrentFileView {
        TorrentFileView {
            index,
            path: path.to_string(),
            size: 700,
            progress: 0.0,
        }
    }

    #[test]
    fn test_select_episode_files() {
        let files = vec![
            file(0, "Show/[Grp] Show - 01 [1080p].mkv"),
            file(1, "Show/[Grp] Show - 02 [1080p].mkv"),
            file(2, "Show/[Grp] Show - 03 [1080p].mkv"),
            file(3, "Show/readme.txt"),
        ];
        let (enabled, missing) = select_episode_files(&files, &[2, 3, 9]);
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].index, 1);
        assert_eq!(enabled[1].index, 2);
        assert_eq!(missing, vec![9]);
    }

    #[test]
    fn test_select_skips_non_video() {
        let files = vec![file(0, "Show/Extras - 02.txt")];
        let (enabled, missing) = select_episode_files(&files, &[2]);
        assert!(enabled.is_empty());
        assert_eq!(missing, vec![2]);
    }
}
