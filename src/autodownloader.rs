//! Auto-downloader
//!
//! Periodically resolves rules against the configured provider feed, dedups
//! against the queue table and hands magnets to the torrent client (or the
//! debrid service). One run moves through idle → querying → matching →
//! queueing → idle; a global mutex prevents overlapping runs and the
//! provider feed is retried with exponential backoff capped well below the
//! next scheduled run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::{
    AutoDownloaderItem, Database, EpisodePolicy, ItemState, Rule, TitleComparison,
};
use crate::debrid::{CredentialVault, provider_from_settings};
use crate::events::{EventBus, WsEvent};
use crate::extensions::ExtensionRegistry;
use crate::extensions::provider::SmartSearchOptions;
use crate::library::{LibraryStore, LocalFile};
use crate::metadata::{AnimeMetadata, MetadataService};
use crate::parser::{self, ParsedData};
use crate::platform::{ListEntry, Platform};
use crate::scanner::auto_scanner::AutoScanner;
use crate::torrent::{TorrentClient, magnet_info_hash};

/// Fuzzy threshold for the "likely" title gate.
pub const COMPARISON_THRESHOLD: f64 = 0.8;

/// A release from the provider feed, normalised for rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTorrent {
    pub name: String,
    pub link: String,
    pub hash: String,
    pub magnet: String,
    pub size: u64,
    pub seeders: i64,
    pub parsed: ParsedData,
    /// Episode number reported by the provider itself, when known.
    pub provider_episode: Option<i32>,
}

impl NormalizedTorrent {
    pub fn from_provider(t: crate::extensions::provider::ProviderTorrent) -> Self {
        Self {
            parsed: parser::parse(&t.name),
            name: t.name,
            link: t.link,
            hash: t.info_hash.to_lowercase(),
            magnet: t.magnet,
            size: t.size,
            seeders: t.seeders,
            provider_episode: t.episode_number,
        }
    }
}

/// Everything the per-candidate gates need, precomputed per rule.
pub struct CandidateContext<'a> {
    pub rule: &'a Rule,
    pub entry: &'a ListEntry,
    pub local_files: &'a [LocalFile],
    pub queued_items: &'a [AutoDownloaderItem],
    pub metadata: Option<&'a AnimeMetadata>,
}

/// Run the gates in order; `Some(episode)` when every gate passes.
pub fn evaluate_candidate(t: &NormalizedTorrent, ctx: &CandidateContext) -> Option<i32> {
    if !release_group_matches(&t.parsed.release_group, ctx.rule) {
        return None;
    }
    if !resolution_matches(&t.parsed.resolution, ctx.rule) {
        return None;
    }
    if !title_matches(&t.parsed.title, ctx.rule, ctx.entry) {
        return None;
    }
    if !additional_terms_match(&t.name, ctx.rule) {
        return None;
    }
    episode_match(t, ctx)
}

/// Release-group allow-list; empty accepts any group.
fn release_group_matches(release_group: &str, rule: &Rule) -> bool {
    if rule.release_groups.is_empty() {
        return true;
    }
    rule.release_groups
        .iter()
        .any(|g| g.eq_ignore_ascii_case(release_group))
}

/// Resolution allow-list, tolerant of the `p` suffix and `WxH` forms.
fn resolution_matches(resolution: &str, rule: &Rule) -> bool {
    if rule.resolutions.is_empty() {
        return true;
    }
    if resolution.is_empty() {
        return false;
    }
    let parsed = resolution.trim_end_matches(['p', 'P']);
    rule.resolutions.iter().any(|wanted| {
        let wanted_trimmed = wanted.trim_end_matches(['p', 'P']);
        resolution.eq_ignore_ascii_case(wanted)
            || parsed.eq_ignore_ascii_case(wanted_trimmed)
            || resolution.to_lowercase().contains(&wanted_trimmed.to_lowercase())
    })
}

/// Title gate per the rule's comparison kind.
fn title_matches(torrent_title: &str, rule: &Rule, entry: &ListEntry) -> bool {
    let comparison = rule.comparison_title.as_str();
    match rule.title_comparison {
        TitleComparison::Exact => torrent_title.eq_ignore_ascii_case(comparison),
        TitleComparison::Contains => {
            !comparison.is_empty()
                && torrent_title
                    .to_lowercase()
                    .contains(&comparison.to_lowercase())
        }
        TitleComparison::Likely => {
            // Cheap path: the comparison title appears almost verbatim.
            if torrent_title
                .to_lowercase()
                .contains(&comparison.to_lowercase())
                && strsim::levenshtein(
                    &torrent_title.to_lowercase(),
                    &comparison.to_lowercase(),
                ) < 4
            {
                return true;
            }
            // Normalised fuzzy against every known title plus the
            // comparison title itself.
            let mut titles = entry.media.all_titles();
            titles.push(comparison.to_string());
            let best = titles
                .iter()
                .map(|title| likely_score(torrent_title, title))
                .fold(0.0, f64::max);
            best >= COMPARISON_THRESHOLD
        }
    }
}

/// Normalised fuzzy score in 0..1.
fn likely_score(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    rapidfuzz::fuzz::ratio(a.chars(), b.chars()) / 100.0
}

/// Every additional term must appear in the raw release name.
fn additional_terms_match(name: &str, rule: &Rule) -> bool {
    let lower = name.to_lowercase();
    rule.additional_terms
        .iter()
        .all(|term| lower.contains(&term.to_lowercase()))
}

/// Episode gate per the rule's policy. Returns the accepted episode number.
fn episode_match(t: &NormalizedTorrent, ctx: &CandidateContext) -> Option<i32> {
    // A parsed range is likely a batch; those are never auto-queued.
    if t.parsed.is_batch() {
        return None;
    }

    let media = &ctx.entry.media;
    let episode = match t.provider_episode.or_else(|| t.parsed.episode_number()) {
        Some(e) => Some(e),
        // No episode number: acceptable only for movies and known
        // single-episode media, as episode 1.
        None if media.is_movie() || media.episode_count() == 1 => Some(1),
        None => None,
    }?;

    // Absolute numbering above the known count is normalised back into the
    // seasonal range via the metadata offset.
    let episode = match ctx.metadata {
        Some(meta) if media.episode_count() > 0 && episode > media.episode_count() => {
            meta.normalize_episode(episode)
        }
        _ => episode,
    };

    // Skip episodes already queued for this media.
    if ctx
        .queued_items
        .iter()
        .any(|item| item.episode == episode && item.state != ItemState::Removed)
    {
        return None;
    }

    // Skip episodes already in the library.
    let in_library = ctx.local_files.iter().any(|lf| {
        lf.media_id == ctx.rule.media_id && lf.is_main() && lf.metadata.episode == episode
    });
    if in_library {
        return None;
    }

    match ctx.rule.episode_policy {
        EpisodePolicy::Recent => {
            if episode > ctx.entry.progress {
                Some(episode)
            } else {
                None
            }
        }
        // 0 is a valid selected number (specials).
        EpisodePolicy::Selected => ctx
            .rule
            .episode_numbers
            .contains(&episode)
            .then_some(episode),
        EpisodePolicy::All => Some(episode),
    }
}

fn resolution_rank(resolution: &str) -> i32 {
    resolution
        .trim_end_matches(['p', 'P'])
        .parse::<i32>()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------

pub struct AutoDownloader {
    db: Database,
    events: EventBus,
    platform: Platform,
    metadata: MetadataService,
    extensions: ExtensionRegistry,
    store: LibraryStore,
    torrent_client: Arc<dyn TorrentClient>,
    auto_scanner: AutoScanner,
    vault: Arc<CredentialVault>,
    run_lock: Mutex<()>,
}

impl AutoDownloader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        events: EventBus,
        platform: Platform,
        metadata: MetadataService,
        extensions: ExtensionRegistry,
        store: LibraryStore,
        torrent_client: Arc<dyn TorrentClient>,
        auto_scanner: AutoScanner,
        vault: Arc<CredentialVault>,
    ) -> Self {
        Self {
            db,
            events,
            platform,
            metadata,
            extensions,
            store,
            torrent_client,
            auto_scanner,
            vault,
            run_lock: Mutex::new(()),
        }
    }

    /// One full cycle. Returns the number of queued items. Overlapping
    /// invocations are rejected, not queued.
    pub async fn run(&self) -> Result<u32> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::debug!("Auto-downloader run already in progress");
            return Ok(0);
        };

        let settings = self.db.settings().get().await?;
        if !settings.auto_downloader.enabled {
            return Ok(0);
        }
        let provider_id = settings.auto_downloader.provider.clone();
        if provider_id.is_empty() {
            tracing::warn!("Auto-downloader enabled but no provider configured");
            return Ok(0);
        }

        self.events.send(WsEvent::AutoDownloaderRunStarted);

        // querying
        let rules: Vec<Rule> = self
            .db
            .rules()
            .list()
            .await?
            .into_iter()
            .filter(|r| r.enabled && r.media_id != 0)
            .collect();
        if rules.is_empty() {
            self.events.send(WsEvent::AutoDownloaderRunCompleted { queued: 0 });
            return Ok(0);
        }

        let collection = self.platform.anime_collection(false).await?;
        let local_files = self.store.get();
        let torrents = self
            .fetch_feed(&provider_id, &rules, settings.auto_downloader.enhanced_queries)
            .await?;
        let existing_hashes: Vec<String> = self
            .torrent_client
            .list()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.hash)
            .collect();

        // matching + queueing
        let mut queued_total: u32 = 0;
        for rule in &rules {
            let Some(entry) = collection.entry(rule.media_id) else {
                tracing::debug!(media_id = rule.media_id, "Rule media not in list, skipping");
                continue;
            };
            let queued_items = self.db.items().list_by_media(rule.media_id).await?;
            let metadata = self.metadata.get_anime_metadata(rule.media_id).await;
            let ctx = CandidateContext {
                rule,
                entry,
                local_files: &local_files,
                queued_items: &queued_items,
                metadata: metadata.as_ref(),
            };

            // Collect every candidate that follows the rule, grouped by
            // episode so the best release per episode wins.
            let mut by_episode: std::collections::HashMap<i32, Vec<&NormalizedTorrent>> =
                std::collections::HashMap::new();
            for t in &torrents {
                if !t.hash.is_empty() && existing_hashes.contains(&t.hash) {
                    continue;
                }
                if let Some(episode) = evaluate_candidate(t, &ctx) {
                    // Dedup on (rule, episode, release name).
                    if self
                        .db
                        .items()
                        .exists(rule.db_id, episode, &t.name)
                        .await
                        .unwrap_or(false)
                    {
                        continue;
                    }
                    by_episode.entry(episode).or_default().push(t);
                }
            }

            for (episode, mut candidates) in by_episode {
                candidates.sort_by_key(|t| {
                    std::cmp::Reverse((resolution_rank(&t.parsed.resolution), t.seeders))
                });
                let best = candidates[0];
                match self.queue_torrent(rule, episode, best, &settings).await {
                    Ok(()) => queued_total += 1,
                    Err(e) => {
                        tracing::error!(
                            rule_id = rule.db_id,
                            episode = episode,
                            name = %best.name,
                            error = %e,
                            "Failed to queue release"
                        );
                    }
                }
            }
        }

        if queued_total > 0 {
            self.auto_scanner.notify();
        }
        self.events.send(WsEvent::AutoDownloaderRunCompleted {
            queued: queued_total,
        });
        tracing::info!(queued = queued_total, "Auto-downloader run finished");
        Ok(queued_total)
    }

    /// Fetch the release feed with capped exponential backoff.
    async fn fetch_feed(
        &self,
        provider_id: &str,
        rules: &[Rule],
        enhanced: bool,
    ) -> Result<Vec<NormalizedTorrent>> {
        let (loaded, provider) = self
            .extensions
            .anime_torrent_provider(provider_id)
            .with_context(|| format!("Provider extension not loaded: {provider_id}"))?;
        let _permit = loaded.semaphore.acquire().await.ok();

        let backoff_policy = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        let latest = backoff::future::retry(backoff_policy, || async {
            provider.latest().await.map_err(backoff::Error::transient)
        })
        .await;
        let mut feed = match latest {
            Ok(items) => items,
            Err(e) => {
                loaded.record_failure();
                anyhow::bail!("Provider feed unavailable: {e}");
            }
        };

        // Enhanced queries: one targeted search per rule media.
        if enhanced {
            let collection = self.platform.anime_collection(false).await?;
            for rule in rules {
                let Some(entry) = collection.entry(rule.media_id) else { continue };
                let opts = SmartSearchOptions {
                    query: rule.comparison_title.clone(),
                    media_id: rule.media_id,
                    titles: entry.media.all_titles(),
                    ..Default::default()
                };
                match provider.smart_search(&opts).await {
                    Ok(results) => feed.extend(results),
                    Err(e) => {
                        loaded.record_failure();
                        tracing::warn!(media_id = rule.media_id, error = %e, "Smart search failed");
                    }
                }
            }
        }

        let mut normalized: Vec<NormalizedTorrent> = Vec::with_capacity(feed.len());
        for t in feed {
            let t = NormalizedTorrent::from_provider(t);
            if !normalized.iter().any(|n| n.name == t.name) {
                normalized.push(t);
            }
        }
        tracing::debug!(count = normalized.len(), "Fetched provider feed");
        Ok(normalized)
    }

    async fn queue_torrent(
        &self,
        rule: &Rule,
        episode: i32,
        t: &NormalizedTorrent,
        settings: &crate::config::Settings,
    ) -> Result<()> {
        let magnet = if !t.magnet.is_empty() {
            t.magnet.clone()
        } else {
            let (_, provider) = self
                .extensions
                .anime_torrent_provider(&settings.auto_downloader.provider)
                .context("Provider extension unloaded mid-run")?;
            provider
                .magnet_link(&crate::extensions::provider::ProviderTorrent {
                    name: t.name.clone(),
                    link: t.link.clone(),
                    info_hash: t.hash.clone(),
                    ..Default::default()
                })
                .await?
        };
        let hash = if t.hash.is_empty() {
            magnet_info_hash(&magnet).unwrap_or_default()
        } else {
            t.hash.clone()
        };

        let added = if settings.auto_downloader.use_debrid {
            match provider_from_settings(settings, &self.vault)? {
                Some(debrid) => debrid.add_torrent(&magnet).await.map(|_| ()),
                None => Err(anyhow::anyhow!("Debrid is not configured")),
            }
        } else {
            self.torrent_client
                .add_magnets(&[magnet.clone()], std::path::Path::new(&rule.destination))
                .await
        };

        let state = match &added {
            Ok(()) => ItemState::Added,
            Err(_) => ItemState::Errored,
        };
        self.db
            .items()
            .insert(
                rule.db_id,
                rule.media_id,
                episode,
                &t.link,
                &hash,
                &magnet,
                &t.name,
                state,
            )
            .await?;

        match added {
            Ok(()) => {
                self.events.send(WsEvent::AutoDownloaderItemAdded {
                    torrent_name: t.name.clone(),
                });
                self.events
                    .notify("info", format!("Queued {} (episode {episode})", t.name));
                tracing::info!(name = %t.name, episode = episode, "Queued release");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Purge queue items older than the configured retention.
    pub async fn purge_stale_items(&self) -> Result<u64> {
        let settings = self.db.settings().get().await?;
        let cutoff = chrono::Utc::now()
            - chrono::Duration::days(settings.auto_downloader.item_retention_days.max(1));
        let purged = self.db.items().purge_older_than(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged = purged, "Purged stale auto-downloader items");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{BaseMedia, MediaTitle};

    fn entry(title: &str, progress: i32, episodes: Option<i32>) -> ListEntry {
        ListEntry {
            media: BaseMedia {
                id: 101,
                title: MediaTitle {
                    romaji: title.to_string(),
                    ..Default::default()
                },
                episodes,
                format: "TV".to_string(),
                ..Default::default()
            },
            progress,
            ..Default::default()
        }
    }

    fn rule() -> Rule {
        Rule {
            db_id: 1,
            enabled: true,
            media_id: 101,
            comparison_title: "Blue Lock".to_string(),
            title_comparison: TitleComparison::Likely,
            episode_policy: EpisodePolicy::Recent,
            destination: "/mnt/anime/Blue Lock".to_string(),
            ..Default::default()
        }
    }

    fn torrent(name: &str) -> NormalizedTorrent {
        NormalizedTorrent {
            parsed: parser::parse(name),
            name: name.to_string(),
            link: String::new(),
            hash: String::new(),
            magnet: String::new(),
            size: 0,
            seeders: 10,
            provider_episode: None,
        }
    }

    fn ctx<'a>(rule: &'a Rule, entry: &'a ListEntry) -> CandidateContext<'a> {
        CandidateContext {
            rule,
            entry,
            local_files: &[],
            queued_items: &[],
            metadata: None,
        }
    }

    #[test]
    fn test_spec_filter_scenario() {
        // Rule {resolutions:[1080p], comparison:"Blue Lock", kind:likely,
        // episodes:recent, progress:2} over three candidates: exactly one
        // queue item, for episode 3.
        let mut rule = rule();
        rule.resolutions = vec!["1080p".to_string()];
        let entry = entry("Blue Lock", 2, Some(24));

        let candidates = [
            torrent("[Group] Blue Lock - 03 [1080p]"),
            torrent("[Group] Blue Lock - 02 [720p]"),
            torrent("[Group] Other - 03 [1080p]"),
        ];
        let context = ctx(&rule, &entry);
        let accepted: Vec<i32> = candidates
            .iter()
            .filter_map(|t| evaluate_candidate(t, &context))
            .collect();
        assert_eq!(accepted, vec![3]);
    }

    #[test]
    fn test_title_gate_exact() {
        let mut r = rule();
        r.title_comparison = TitleComparison::Exact;
        let e = entry("Blue Lock", 0, Some(24));
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 03"), &ctx(&r, &e)).is_some());
        assert!(
            evaluate_candidate(&torrent("[Grp] Blue Lock Gaiden - 03"), &ctx(&r, &e)).is_none()
        );
    }

    #[test]
    fn test_title_gate_contains() {
        let mut r = rule();
        r.title_comparison = TitleComparison::Contains;
        r.comparison_title = "Lock".to_string();
        let e = entry("Blue Lock", 0, Some(24));
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 03"), &ctx(&r, &e)).is_some());
        assert!(evaluate_candidate(&torrent("[Grp] Frieren - 03"), &ctx(&r, &e)).is_none());
    }

    #[test]
    fn test_release_group_gate() {
        let mut r = rule();
        r.release_groups = vec!["Judas".to_string()];
        let e = entry("Blue Lock", 0, Some(24));
        assert!(evaluate_candidate(&torrent("[Judas] Blue Lock - 05"), &ctx(&r, &e)).is_some());
        assert!(evaluate_candidate(&torrent("[Other] Blue Lock - 05"), &ctx(&r, &e)).is_none());
    }

    #[test]
    fn test_additional_terms_gate() {
        let mut r = rule();
        r.additional_terms = vec!["HEVC".to_string(), "FLAC".to_string()];
        let e = entry("Blue Lock", 0, Some(24));
        assert!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 05 [HEVC FLAC]"), &ctx(&r, &e))
                .is_some()
        );
        assert!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 05 [HEVC AAC]"), &ctx(&r, &e))
                .is_none()
        );
    }

    #[test]
    fn test_recent_policy_respects_progress() {
        let r = rule();
        let e = entry("Blue Lock", 5, Some(24));
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 05"), &ctx(&r, &e)).is_none());
        assert_eq!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 06"), &ctx(&r, &e)),
            Some(6)
        );
    }

    #[test]
    fn test_selected_policy_includes_zero() {
        let mut r = rule();
        r.episode_policy = EpisodePolicy::Selected;
        r.episode_numbers = vec![0, 7];
        let e = entry("Blue Lock", 0, Some(24));
        assert_eq!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 07"), &ctx(&r, &e)),
            Some(7)
        );
        assert_eq!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 00"), &ctx(&r, &e)),
            Some(0)
        );
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 08"), &ctx(&r, &e)).is_none());
    }

    #[test]
    fn test_batches_are_skipped() {
        let r = rule();
        let e = entry("Blue Lock", 0, Some(24));
        assert!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 01-24 [Batch]"), &ctx(&r, &e))
                .is_none()
        );
    }

    #[test]
    fn test_movie_without_episode_number() {
        let mut r = rule();
        r.comparison_title = "Kimi no Na wa".to_string();
        let mut e = entry("Kimi no Na wa", 0, Some(1));
        e.media.format = "MOVIE".to_string();
        assert_eq!(
            evaluate_candidate(&torrent("[Grp] Kimi no Na wa [1080p BD]"), &ctx(&r, &e)),
            Some(1)
        );
    }

    #[test]
    fn test_episode_already_in_library_skipped() {
        let r = rule();
        let e = entry("Blue Lock", 0, Some(24));
        let mut lf = LocalFile::default();
        lf.media_id = 101;
        lf.metadata.episode = 5;
        let files = vec![lf];
        let context = CandidateContext {
            rule: &r,
            entry: &e,
            local_files: &files,
            queued_items: &[],
            metadata: None,
        };
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 05"), &context).is_none());
    }

    #[test]
    fn test_queued_episode_skipped() {
        let r = rule();
        let e = entry("Blue Lock", 0, Some(24));
        let items = vec![AutoDownloaderItem {
            id: 1,
            rule_id: 1,
            media_id: 101,
            episode: 5,
            link: String::new(),
            hash: String::new(),
            magnet: String::new(),
            torrent_name: "[Grp] Blue Lock - 05".to_string(),
            state: ItemState::Added,
            created_at: chrono::Utc::now(),
        }];
        let context = CandidateContext {
            rule: &r,
            entry: &e,
            local_files: &[],
            queued_items: &items,
            metadata: None,
        };
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 05"), &context).is_none());
        // A different episode still passes
        assert!(evaluate_candidate(&torrent("[Grp] Blue Lock - 06"), &context).is_some());
    }

    #[test]
    fn test_absolute_episode_normalized() {
        let r = rule();
        let e = entry("Blue Lock", 0, Some(12));
        let meta = AnimeMetadata {
            media_id: 101,
            episode_count: 12,
            absolute_offset: 24,
            ..Default::default()
        };
        let context = CandidateContext {
            rule: &r,
            entry: &e,
            local_files: &[],
            queued_items: &[],
            metadata: Some(&meta),
        };
        assert_eq!(
            evaluate_candidate(&torrent("[Grp] Blue Lock - 27"), &context),
            Some(3)
        );
    }

    #[test]
    fn test_resolution_rank() {
        assert!(resolution_rank("1080p") > resolution_rank("720p"));
        assert_eq!(resolution_rank(""), 0);
    }
}
