//! Entry views
//!
//! Derived, never stored: for one media id, the local files grouped by
//! episode kind plus the mirrored list entry. Ignored files never appear
//! here. The canonical-file invariant is enforced at this boundary: for any
//! `(media, episode)` with kind `main`, exactly one file is selected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::local_file::{LocalFile, LocalFileKind};
use crate::platform::{AnimeCollection, ListEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryEpisode {
    pub episode: i32,
    pub anidb_episode: String,
    pub path: String,
    pub file_name: String,
    pub kind: LocalFileKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub media_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_entry: Option<ListEntry>,
    pub episodes: Vec<EntryEpisode>,
    pub special_count: usize,
    pub nc_count: usize,
    /// Paths carrying the locked bit, surfaced for the UI
    pub locked_paths: Vec<String>,
}

/// Build the entry view for one media id.
pub fn build_entry(
    media_id: i64,
    files: &[LocalFile],
    collection: &AnimeCollection,
) -> Option<MediaEntry> {
    let matched: Vec<&LocalFile> = files
        .iter()
        .filter(|lf| lf.media_id == media_id && !lf.ignored)
        .collect();
    if matched.is_empty() {
        return None;
    }

    // One canonical main file per episode: prefer the higher release
    // version, then the better resolution.
    let mut mains: BTreeMap<i32, &LocalFile> = BTreeMap::new();
    let mut specials = Vec::new();
    let mut ncs = Vec::new();
    for lf in &matched {
        match lf.metadata.kind {
            LocalFileKind::Main => {
                let episode = lf.metadata.episode;
                match mains.get(&episode) {
                    Some(existing) if !prefer(lf, existing) => {}
                    _ => {
                        mains.insert(episode, lf);
                    }
                }
            }
            LocalFileKind::Special => specials.push(*lf),
            LocalFileKind::Nc => ncs.push(*lf),
        }
    }

    let mut episodes: Vec<EntryEpisode> = mains
        .values()
        .map(|lf| EntryEpisode {
            episode: lf.metadata.episode,
            anidb_episode: lf.metadata.anidb_episode.clone(),
            path: lf.path.clone(),
            file_name: lf.name.clone(),
            kind: LocalFileKind::Main,
        })
        .collect();
    episodes.extend(specials.iter().map(|lf| EntryEpisode {
        episode: lf.metadata.episode,
        anidb_episode: lf.metadata.anidb_episode.clone(),
        path: lf.path.clone(),
        file_name: lf.name.clone(),
        kind: LocalFileKind::Special,
    }));

    Some(MediaEntry {
        media_id,
        list_entry: collection.entry(media_id).cloned(),
        special_count: specials.len(),
        nc_count: ncs.len(),
        locked_paths: matched
            .iter()
            .filter(|lf| lf.locked)
            .map(|lf| lf.path.clone())
            .collect(),
        episodes,
    })
}

/// Entry views for every matched media id in the set.
pub fn build_entries(files: &[LocalFile], collection: &AnimeCollection) -> Vec<MediaEntry> {
    let mut ids: Vec<i64> = files
        .iter()
        .filter(|lf| lf.is_matched() && !lf.ignored)
        .map(|lf| lf.media_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.into_iter()
        .filter_map(|id| build_entry(id, files, collection))
        .collect()
}

/// Unmatched, non-ignored files: suggestion candidates.
pub fn unmatched_files(files: &[LocalFile]) -> Vec<&LocalFile> {
    files
        .iter()
        .filter(|lf| !lf.is_matched() && !lf.ignored)
        .collect()
}

/// True when `a` should replace `b` as the canonical file for an episode.
fn prefer(a: &LocalFile, b: &LocalFile) -> bool {
    let version = |lf: &LocalFile| {
        lf.parsed_data
            .release_version
            .parse::<i32>()
            .unwrap_or(1)
    };
    let resolution = |lf: &LocalFile| {
        let r = &lf.parsed_data.resolution;
        r.trim_end_matches(['p', 'P']).parse::<i32>().unwrap_or(0)
    };
    (version(a), resolution(a)) > (version(b), resolution(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::local_file::LocalFileMetadata;

    fn lf(path: &str, media_id: i64, episode: i32, kind: LocalFileKind) -> LocalFile {
        LocalFile {
            path: path.to_string(),
            normalized_path: path.to_lowercase(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            media_id,
            metadata: LocalFileMetadata {
                episode,
                anidb_episode: episode.to_string(),
                kind,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_one_canonical_main_per_episode() {
        let mut v1 = lf("/a/ep3-v1.mkv", 1, 3, LocalFileKind::Main);
        v1.parsed_data.release_version = "1".into();
        let mut v2 = lf("/a/ep3-v2.mkv", 1, 3, LocalFileKind::Main);
        v2.parsed_data.release_version = "2".into();

        let entry = build_entry(1, &[v1, v2], &AnimeCollection::default()).unwrap();
        let mains: Vec<_> = entry
            .episodes
            .iter()
            .filter(|e| e.kind == LocalFileKind::Main && e.episode == 3)
            .collect();
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].path, "/a/ep3-v2.mkv");
    }

    #[test]
    fn test_ignored_files_hidden() {
        let mut hidden = lf("/a/ep1.mkv", 1, 1, LocalFileKind::Main);
        hidden.ignored = true;
        assert!(build_entry(1, &[hidden], &AnimeCollection::default()).is_none());
    }

    #[test]
    fn test_unmatched_candidates() {
        let files = vec![
            lf("/a/known.mkv", 1, 1, LocalFileKind::Main),
            lf("/a/unknown.mkv", 0, 0, LocalFileKind::Main),
        ];
        let unmatched = unmatched_files(&files);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].path, "/a/unknown.mkv");
    }
}
