//! Matcher
//!
//! Scores unmatched candidates against the media pool using the configured
//! string-distance algorithm. A candidate is accepted when the best
//! similarity reaches the threshold. Season and year enter the comparison
//! through the candidate's title variations (a scoring boost, never a hard
//! filter). A validation pass then un-matches outliers within each media
//! group.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::summary::SummaryLogger;
use crate::library::LocalFile;
use crate::platform::BaseMedia;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MatchingAlgorithm {
    Levenshtein,
    JaroWinkler,
    #[default]
    SorensenDice,
}

impl MatchingAlgorithm {
    pub fn parse(s: &str) -> Self {
        match s {
            "levenshtein" => Self::Levenshtein,
            "jaro-winkler" => Self::JaroWinkler,
            _ => Self::SorensenDice,
        }
    }

    /// Similarity in 0..1 (1 = identical) on normalised titles.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize_title(a);
        let b = normalize_title(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        match self {
            Self::Levenshtein => strsim::normalized_levenshtein(&a, &b),
            Self::JaroWinkler => strsim::jaro_winkler(&a, &b),
            Self::SorensenDice => strsim::sorensen_dice(&a, &b),
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for c in title.to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim().to_string()
}

/// The media the matcher compares against: the user's list plus any
/// enhanced search results, indexed by title.
pub struct MediaPool {
    media: Vec<BaseMedia>,
    /// (normalised title, index into media)
    titles: Vec<(String, usize)>,
}

impl MediaPool {
    pub fn new(media: Vec<BaseMedia>) -> Self {
        let mut titles = Vec::new();
        for (idx, m) in media.iter().enumerate() {
            for title in m.all_titles() {
                titles.push((title, idx));
            }
        }
        Self { media, titles }
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn media(&self, media_id: i64) -> Option<&BaseMedia> {
        self.media.iter().find(|m| m.id == media_id)
    }

    pub fn contains(&self, media_id: i64) -> bool {
        self.media(media_id).is_some()
    }

    /// Whether any known title compares at or above `threshold`.
    pub fn has_similar(&self, title: &str, algorithm: MatchingAlgorithm, threshold: f64) -> bool {
        self.best_for(title, algorithm)
            .is_some_and(|(_, score, _)| score >= threshold)
    }

    pub fn push(&mut self, media: BaseMedia) {
        if self.contains(media.id) {
            return;
        }
        let idx = self.media.len();
        for title in media.all_titles() {
            self.titles.push((title, idx));
        }
        self.media.push(media);
    }

    /// Best match across all known titles for one candidate string. Ties on
    /// score go to the longer (more specific) title, so "Show Season 2"
    /// beats "Show" when both compare perfectly.
    fn best_for(&self, candidate: &str, algorithm: MatchingAlgorithm) -> Option<(usize, f64, usize)> {
        let mut best: Option<(usize, f64, usize)> = None;
        for (title, idx) in &self.titles {
            let score = algorithm.similarity(candidate, title);
            let len = title.len();
            if best.is_none_or(|(_, s, l)| (score, len) > (s, l)) {
                best = Some((*idx, score, len));
            }
        }
        best
    }
}

/// Result of matching one file.
pub struct MatchResult {
    pub media_id: i64,
    pub score: f64,
}

/// Find the best media for a file across its title variations. Accepts when
/// the best similarity reaches `threshold`.
pub fn match_file(
    lf: &LocalFile,
    pool: &MediaPool,
    threshold: f64,
    algorithm: MatchingAlgorithm,
) -> Option<MatchResult> {
    let variations = lf.title_variations();
    if variations.is_empty() {
        return None;
    }

    let mut best: Option<(usize, f64, usize)> = None;
    for variation in &variations {
        if let Some((idx, score, len)) = pool.best_for(variation, algorithm) {
            if best.is_none_or(|(_, s, l)| (score, len) > (s, l)) {
                best = Some((idx, score, len));
            }
        }
    }

    let (idx, score, _) = best?;
    if score < threshold {
        return None;
    }
    let candidate = &pool.media[idx];

    // Seasonal disambiguation: when the file names a year that the
    // candidate also knows, prefer a year-consistent candidate with a
    // similar score.
    if let (Some(file_year), Some(media_year)) = (lf.year(), candidate.season_year) {
        if file_year != media_year {
            let better = pool
                .media
                .iter()
                .enumerate()
                .filter(|(_, m)| m.season_year == Some(file_year))
                .filter_map(|(i, m)| {
                    m.all_titles()
                        .iter()
                        .flat_map(|t| {
                            variations
                                .iter()
                                .map(|v| algorithm.similarity(v, t))
                                .collect::<Vec<_>>()
                        })
                        .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))))
                        .map(|s| (i, s))
                })
                .filter(|(_, s)| *s >= threshold && *s >= score - 0.05)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((i, s)) = better {
                return Some(MatchResult {
                    media_id: pool.media[i].id,
                    score: s,
                });
            }
        }
    }

    Some(MatchResult {
        media_id: candidate.id,
        score,
    })
}

/// Validation pass: within each media group, un-match files whose own best
/// rating against that media's titles falls far below the group's highest.
/// Specials and NC files are exempt, their names rarely carry the title.
pub fn validate_matches(
    files: &mut [LocalFile],
    pool: &MediaPool,
    algorithm: MatchingAlgorithm,
    summary: &SummaryLogger,
) {
    const MAX_RATING_GAP: f64 = 0.7;

    let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, lf) in files.iter().enumerate() {
        if lf.media_id != 0 && !lf.locked {
            groups.entry(lf.media_id).or_default().push(i);
        }
    }

    for (media_id, indices) in groups {
        let Some(media) = pool.media(media_id) else { continue };
        let titles = media.all_titles();

        let rating = |lf: &LocalFile| -> f64 {
            if lf.looks_special() || lf.looks_nc() {
                return 0.0;
            }
            let t = lf.parsed_title();
            titles
                .iter()
                .map(|title| algorithm.similarity(&t, title))
                .fold(0.0, f64::max)
        };

        let ratings: Vec<f64> = indices.iter().map(|&i| rating(&files[i])).collect();
        let highest = ratings.iter().copied().fold(0.0, f64::max);

        for (&i, &r) in indices.iter().zip(&ratings) {
            let lf = &mut files[i];
            if lf.looks_special() || lf.looks_nc() {
                continue;
            }
            if r < highest && (highest - r) > MAX_RATING_GAP {
                summary.unmatched(
                    &lf.path,
                    format!("Rating {r:.2} far below group best {highest:.2}, un-matching"),
                );
                lf.media_id = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MediaTitle;
    use std::path::PathBuf;

    fn media(id: i64, romaji: &str, year: Option<i32>) -> BaseMedia {
        BaseMedia {
            id,
            title: MediaTitle {
                romaji: romaji.to_string(),
                ..Default::default()
            },
            season_year: year,
            ..Default::default()
        }
    }

    fn file(name: &str) -> LocalFile {
        LocalFile::new(
            &PathBuf::from(format!("/mnt/anime/{name}")),
            &PathBuf::from("/mnt/anime"),
        )
    }

    #[test]
    fn test_exact_title_matches() {
        let pool = MediaPool::new(vec![
            media(1, "Blue Lock", None),
            media(2, "Blue Period", None),
        ]);
        let lf = file("[Judas] Blue Lock - S01E03.mkv");
        let result = match_file(&lf, &pool, 0.5, MatchingAlgorithm::SorensenDice).unwrap();
        assert_eq!(result.media_id, 1);
        assert!(result.score > 0.9);
    }

    #[test]
    fn test_below_threshold_rejected() {
        let pool = MediaPool::new(vec![media(1, "Completely Different Series", None)]);
        let lf = file("[Grp] Frieren - 04.mkv");
        assert!(match_file(&lf, &pool, 0.6, MatchingAlgorithm::SorensenDice).is_none());
    }

    #[test]
    fn test_all_algorithms_accept_identity() {
        let pool = MediaPool::new(vec![media(1, "Sousou no Frieren", None)]);
        let lf = file("Sousou no Frieren - 01.mkv");
        for algorithm in [
            MatchingAlgorithm::Levenshtein,
            MatchingAlgorithm::JaroWinkler,
            MatchingAlgorithm::SorensenDice,
        ] {
            let result = match_file(&lf, &pool, 0.8, algorithm).unwrap();
            assert_eq!(result.media_id, 1, "{algorithm:?}");
        }
    }

    #[test]
    fn test_season_variation_disambiguates() {
        let pool = MediaPool::new(vec![
            media(1, "Spice and Wolf", None),
            media(2, "Spice and Wolf Season 2", None),
        ]);
        let lf = file("Spice and Wolf Season 2 - 04.mkv");
        let result = match_file(&lf, &pool, 0.5, MatchingAlgorithm::SorensenDice).unwrap();
        assert_eq!(result.media_id, 2);
    }

    #[test]
    fn test_year_boosts_matching_candidate() {
        let pool = MediaPool::new(vec![
            media(1, "Hunter x Hunter", Some(1999)),
            media(2, "Hunter x Hunter (2011)", Some(2011)),
        ]);
        let lf = file("Hunter x Hunter (2011) - 001.mkv");
        let result = match_file(&lf, &pool, 0.5, MatchingAlgorithm::SorensenDice).unwrap();
        assert_eq!(result.media_id, 2);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Bocchi the Rock!"), "bocchi the rock");
        assert_eq!(normalize_title("  K-ON!!  "), "k on");
    }

    #[test]
    fn test_deterministic_matching() {
        let pool = MediaPool::new(vec![media(1, "Blue Lock", None), media(2, "Frieren", None)]);
        let lf = file("[Judas] Blue Lock - S01E03.mkv");
        let first = match_file(&lf, &pool, 0.5, MatchingAlgorithm::SorensenDice).unwrap();
        for _ in 0..5 {
            let again = match_file(&lf, &pool, 0.5, MatchingAlgorithm::SorensenDice).unwrap();
            assert_eq!(again.media_id, first.media_id);
            assert_eq!(again.score, first.score);
        }
    }
}
