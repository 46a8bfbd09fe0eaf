//! Library scanner
//!
//! Walks the library roots, parses and matches candidate files against the
//! media pool, hydrates episode metadata and emits a full replacement
//! local-file set plus a scan summary. Locked files are carried forward
//! unchanged; parsing and scoring run on a bounded blocking pool keyed off
//! the CPU count, and a panicking worker un-matches its chunk instead of
//! aborting the scan.

pub mod auto_scanner;
pub mod hydrator;
pub mod matcher;
pub mod summary;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::db::Database;
use crate::events::{EventBus, WsEvent};
use crate::library::{LibraryStore, LocalFile};
use crate::metadata::MetadataService;
use crate::parser::keywords;
use crate::platform::Platform;
use hydrator::Hydrator;
use matcher::{MatchingAlgorithm, MediaPool};
use summary::SummaryLogger;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Resolve unknown folder titles against the metadata search
    pub enhanced: bool,
    /// Carry ignored files forward instead of re-parsing them
    pub skip_ignored: bool,
    pub matching_threshold: f64,
    pub matching_algorithm: MatchingAlgorithm,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub summary_id: i64,
    pub total_files: usize,
    pub matched_files: usize,
    pub unmatched_files: usize,
}

#[derive(Clone)]
pub struct Scanner {
    db: Database,
    store: LibraryStore,
    platform: Platform,
    metadata: MetadataService,
    events: EventBus,
}

impl Scanner {
    pub fn new(
        db: Database,
        store: LibraryStore,
        platform: Platform,
        metadata: MetadataService,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            store,
            platform,
            metadata,
            events,
        }
    }

    /// Options derived from the current settings row.
    pub async fn options_from_settings(&self) -> Result<(Vec<String>, ScanOptions)> {
        let settings = self.db.settings().get().await?;
        Ok((
            settings.library_paths.clone(),
            ScanOptions {
                enhanced: settings.enhanced_scanning,
                skip_ignored: settings.skip_ignored_files,
                matching_threshold: settings.matching_threshold,
                matching_algorithm: MatchingAlgorithm::parse(&settings.matching_algorithm),
            },
        ))
    }

    /// Run a full scan of the given roots.
    pub async fn scan(&self, roots: &[String], opts: &ScanOptions) -> Result<ScanResult> {
        self.events.send(WsEvent::ScanStarted);
        tracing::info!(roots = ?roots, "Starting library scan");

        let summary = SummaryLogger::new();
        let existing = self.store.get();

        // 1. Enumerate candidate files across every root.
        let mut candidates: Vec<LocalFile> = Vec::new();
        for root in roots {
            let root_path = Path::new(root);
            if !root_path.is_dir() {
                tracing::warn!(root = %root, "Library root missing, skipping");
                summary.warn(root, "Library root missing or unreadable");
                continue;
            }
            self.enumerate_root(root_path, &mut candidates, &summary);
        }
        let total_files = candidates.len();
        tracing::info!(files = total_files, "Enumerated candidate files");
        self.events.send(WsEvent::ScanProgress {
            scanned: 0,
            total: total_files as u32,
        });

        // 2. Preserve locked (and optionally ignored) files unchanged.
        let preserved: HashMap<String, LocalFile> = existing
            .iter()
            .filter(|lf| lf.locked || (opts.skip_ignored && lf.ignored))
            .map(|lf| (lf.normalized_path.clone(), lf.clone()))
            .collect();

        let mut to_match: Vec<LocalFile> = Vec::new();
        let mut output: Vec<LocalFile> = Vec::new();
        for candidate in candidates {
            match preserved.get(&candidate.normalized_path) {
                Some(kept) => {
                    summary.info(&kept.path, "Preserved (locked or ignored)");
                    output.push(kept.clone());
                }
                None => {
                    // Re-use ignore bits of unlocked known files.
                    let mut candidate = candidate;
                    if let Some(prev) = existing
                        .iter()
                        .find(|lf| lf.normalized_path == candidate.normalized_path)
                    {
                        candidate.ignored = prev.ignored;
                    }
                    to_match.push(candidate);
                }
            }
        }

        // Locked files that vanished from disk are still user assertions;
        // carry them until the user confirms removal.
        for lf in existing.iter() {
            if lf.locked
                && !output
                    .iter()
                    .chain(to_match.iter())
                    .any(|c| c.normalized_path == lf.normalized_path)
                && !Path::new(&lf.path).exists()
            {
                summary.warn(&lf.path, "Locked file missing on disk, kept until confirmed");
                output.push(lf.clone());
            }
        }

        // 3/4. Build the media pool.
        let pool = Arc::new(self.build_media_pool(&to_match, opts).await?);

        // 5. Match across a bounded worker pool.
        let mut matched = self
            .match_candidates(to_match, pool.clone(), opts, &summary)
            .await;

        matcher::validate_matches(&mut matched, &pool, opts.matching_algorithm, &summary);

        // 6. Hydrate episode metadata.
        let hydrator = Hydrator {
            metadata: Some(&self.metadata),
            pool: &pool,
            summary: &summary,
        };
        hydrator.hydrate(&mut matched).await;

        for lf in &matched {
            if !lf.is_matched() {
                summary.unmatched(&lf.path, "No media matched");
            }
        }

        output.extend(matched);
        let matched_files = output.iter().filter(|lf| lf.is_matched()).count();

        // 7. Emit: atomically replace the set and persist the summary.
        self.store.replace(output).await?;
        let scan_summary = summary.finalize(total_files, matched_files);
        let unmatched_files = scan_summary.unmatched_files;
        let summary_id = self.db.scan_summaries().insert(&scan_summary).await?;

        self.events.send(WsEvent::ScanCompleted { summary_id });
        self.events.send(WsEvent::LibraryUpdated);
        tracing::info!(
            total = total_files,
            matched = matched_files,
            unmatched = unmatched_files,
            summary_id = summary_id,
            "Library scan completed"
        );

        Ok(ScanResult {
            summary_id,
            total_files,
            matched_files,
            unmatched_files,
        })
    }

    fn enumerate_root(&self, root: &Path, out: &mut Vec<LocalFile>, summary: &SummaryLogger) {
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|| root.to_string_lossy().to_string());
                    tracing::warn!(path = %path, error = %e, "Unreadable entry, skipping");
                    summary.warn(&path, format!("Unreadable: {e}"));
                    continue;
                }
            };
            if !entry.path().is_file() {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !keywords::is_video_extension(ext) {
                continue;
            }
            out.push(LocalFile::new(entry.path(), root));
        }
    }

    async fn build_media_pool(
        &self,
        candidates: &[LocalFile],
        opts: &ScanOptions,
    ) -> Result<MediaPool> {
        let collection = self
            .platform
            .anime_collection(false)
            .await
            .context("Failed to build media pool")?;
        let mut pool = MediaPool::new(collection.all_media().cloned().collect());

        // Enhanced scanning: search the metadata port for folder titles the
        // list does not cover.
        if opts.enhanced {
            let mut unknown_titles: Vec<String> = Vec::new();
            for lf in candidates {
                let title = lf.parsed_title();
                if title.is_empty() || unknown_titles.contains(&title) {
                    continue;
                }
                if !pool.has_similar(&title, matcher::MatchingAlgorithm::SorensenDice, 0.75) {
                    unknown_titles.push(title);
                }
            }
            for title in unknown_titles {
                for media in self.metadata.search_media(&title).await {
                    pool.push(media);
                }
            }
        }

        Ok(pool)
    }

    /// Parse/score candidates on the blocking pool, bounded by CPU count.
    /// A panicking chunk is recovered: its files are left unmatched.
    async fn match_candidates(
        &self,
        candidates: Vec<LocalFile>,
        pool: Arc<MediaPool>,
        opts: &ScanOptions,
        summary: &SummaryLogger,
    ) -> Vec<LocalFile> {
        let workers = num_cpus::get().max(1);
        let chunk_size = candidates.len().div_ceil(workers).max(1);
        let threshold = opts.matching_threshold;
        let algorithm = opts.matching_algorithm;

        let mut handles = Vec::new();
        for chunk in candidates.chunks(chunk_size) {
            let chunk: Vec<LocalFile> = chunk.to_vec();
            let pool = pool.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut out = Vec::with_capacity(chunk.len());
                for mut lf in chunk {
                    if lf.ignored {
                        out.push((lf, None));
                        continue;
                    }
                    let result = matcher::match_file(&lf, &pool, threshold, algorithm);
                    match &result {
                        Some(m) => lf.media_id = m.media_id,
                        None => lf.media_id = 0,
                    }
                    let score = result.map(|m| m.score);
                    out.push((lf, score));
                }
                out
            }));
        }

        let mut matched = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(chunk) => {
                    for (lf, score) in chunk {
                        if let Some(score) = score {
                            summary.info(
                                &lf.path,
                                format!("Matched media {} (score {score:.2})", lf.media_id),
                            );
                        }
                        matched.push(lf);
                    }
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("Matcher worker panicked, its files are left unmatched");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Matcher worker failed");
                }
            }
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCacher;

    async fn scanner(dir: &tempfile::TempDir) -> (Scanner, LibraryStore) {
        let db = Database::connect_memory().await.unwrap();
        let cache = FileCacher::new(dir.path().join("cache")).unwrap();
        let store = LibraryStore::load(db.clone()).await.unwrap();
        let platform = Platform::new(db.clone(), cache.clone());
        let metadata = MetadataService::new(cache, platform.clone());
        (
            Scanner::new(db, store.clone(), platform, metadata, EventBus::new()),
            store,
        )
    }

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_scan_enumerates_video_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        touch(&root, "Show/Show - 01.mkv");
        touch(&root, "Show/Show - 02.mkv");
        touch(&root, "Show/cover.jpg");

        let (scanner, store) = scanner(&dir).await;
        let opts = ScanOptions {
            enhanced: false,
            skip_ignored: true,
            matching_threshold: 0.5,
            matching_algorithm: MatchingAlgorithm::SorensenDice,
        };
        let result = scanner
            .scan(&[root.to_string_lossy().to_string()], &opts)
            .await
            .unwrap();

        assert_eq!(result.total_files, 2);
        assert_eq!(store.get().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_is_deterministic_and_preserves_locked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        touch(&root, "Show/Show - 01.mkv");

        let (scanner, store) = scanner(&dir).await;
        let opts = ScanOptions {
            enhanced: false,
            skip_ignored: true,
            matching_threshold: 0.5,
            matching_algorithm: MatchingAlgorithm::SorensenDice,
        };
        let roots = vec![root.to_string_lossy().to_string()];
        scanner.scan(&roots, &opts).await.unwrap();

        // Lock the file with a manual match.
        let path = store.get()[0].path.clone();
        store
            .update_one(
                &path,
                crate::library::LocalFilePatch {
                    media_id: Some(777),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let locked_before = store.get()[0].clone();

        // Two more scans: the locked file must be byte-for-byte preserved.
        scanner.scan(&roots, &opts).await.unwrap();
        let after_first = store.get();
        scanner.scan(&roots, &opts).await.unwrap();
        let after_second = store.get();

        assert_eq!(after_first.len(), after_second.len());
        let kept = after_second
            .iter()
            .find(|lf| lf.normalized_path == locked_before.normalized_path)
            .unwrap();
        assert_eq!(kept.media_id, 777);
        assert!(kept.locked);
        assert_eq!(
            serde_json::to_string(kept).unwrap(),
            serde_json::to_string(&locked_before).unwrap()
        );
    }
}
