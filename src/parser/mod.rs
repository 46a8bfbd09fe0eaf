//! Filename parser
//!
//! Tokenises a file or folder name into structured metadata by token
//! classification: split on delimiters while preserving bracket pairs as
//! groups, classify bracket groups (the leading all-non-keyword bracket is
//! the release group, the others are tag bags), then scan the remaining
//! tokens left to right against a closed keyword lexicon. Numeric runs are
//! episode candidates unless a season/part/volume prefix claims them or they
//! look like a year; the later run wins and an `SxxExx` pattern overrides
//! loose guesses. Parsing never fails — ambiguity produces zero values and
//! downstream matchers cope.

pub mod keywords;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use keywords::KeywordCategory;

/// Structured metadata extracted from a file or folder name.
///
/// Empty strings and empty vectors mean "not determinable".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedData {
    pub original: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub release_group: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub season: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub season_range: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub episode: String,
    /// Upper bound of a `NN-MM` range release.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub other_episode: String,
    /// Alternate (usually absolute) episode number, e.g. `- 03 (51)`.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub alt_episode: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub episode_title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub part: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub volume: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub year: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub resolution: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub checksum: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub release_version: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub extension: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub anime_type: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub source: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub audio: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub video_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub language: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub subtitles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub release_information: Vec<String>,
}

impl ParsedData {
    pub fn episode_number(&self) -> Option<i32> {
        self.episode.parse().ok()
    }

    pub fn other_episode_number(&self) -> Option<i32> {
        self.other_episode.parse().ok()
    }

    pub fn season_number(&self) -> Option<i32> {
        self.season.parse().ok()
    }

    pub fn year_number(&self) -> Option<i32> {
        self.year.parse().ok()
    }

    /// A `NN-MM` range usually indicates a batch release.
    pub fn is_batch(&self) -> bool {
        !self.other_episode.is_empty()
            || self
                .release_information
                .iter()
                .any(|s| s.eq_ignore_ascii_case("batch") || s.eq_ignore_ascii_case("complete"))
    }

    pub fn has_episode(&self) -> bool {
        !self.episode.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Unknown,
    ReleaseGroup,
    Keyword(KeywordCategory),
    Resolution,
    Checksum,
    Year,
    Season,
    Episode,
    OtherEpisode,
    AltEpisode,
    Part,
    Volume,
    Consumed,
}

#[derive(Debug, Clone)]
struct Token {
    value: String,
    upper: String,
    enclosed: bool,
    class: TokenClass,
}

impl Token {
    fn new(value: String, enclosed: bool) -> Self {
        let upper = value.to_uppercase();
        Self {
            value,
            upper,
            enclosed,
            class: TokenClass::Unknown,
        }
    }

    fn is_numeric(&self) -> bool {
        !self.value.is_empty() && self.value.chars().all(|c| c.is_ascii_digit())
    }
}

static RE_RESOLUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{3,4}p|\d{3,4}x\d{3,4}|4k|uhd)$").unwrap());
static RE_SXX_EXX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^s(\d{1,2})(?:-s?(\d{1,2}))?e(\d{1,4})(?:-e?(\d{1,4}))?(?:v(\d+))?$").unwrap());
static RE_NXNN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})x(\d{2,3})$").unwrap());
static RE_SEASON_COMBINED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^s(\d{1,2})(?:-s?(\d{1,2}))?$").unwrap());
static RE_EPISODE_COMBINED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:e|ep|eps|#)(\d{1,4})(?:v(\d+))?$").unwrap());
static RE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,4})-(\d{1,4})(?:[vV]\d+)?$").unwrap());
static RE_NUM_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d{1,4})v(\d+)$").unwrap());

/// Parse a file or folder name. Never fails.
pub fn parse(name: &str) -> ParsedData {
    Parser::new(name).run()
}

struct Parser {
    tokens: Vec<Token>,
    data: ParsedData,
    /// index of the episode token once selected
    episode_index: Option<usize>,
}

impl Parser {
    fn new(name: &str) -> Self {
        let mut data = ParsedData {
            original: name.to_string(),
            ..Default::default()
        };
        let stem = strip_extension(name, &mut data);
        Self {
            tokens: tokenize(&stem),
            data,
            episode_index: None,
        }
    }

    fn run(mut self) -> ParsedData {
        self.identify_release_group();
        self.identify_keywords();
        self.identify_prefixed_numbers();
        self.select_episode();
        self.identify_title();
        self.collect();
        self.data
    }

    /// The leading bracket group is the release group when none of its
    /// tokens are recognised keywords or bare numbers.
    fn identify_release_group(&mut self) {
        let mut group: Vec<usize> = Vec::new();
        for (i, t) in self.tokens.iter().enumerate() {
            if !t.enclosed {
                break;
            }
            group.push(i);
        }
        if group.is_empty() {
            return;
        }
        let qualifies = group.iter().all(|&i| {
            let t = &self.tokens[i];
            !t.is_numeric()
                && keywords::classify(&t.upper).is_none()
                && !RE_RESOLUTION.is_match(&t.value)
                && !is_checksum(t)
        });
        if qualifies {
            for &i in &group {
                self.tokens[i].class = TokenClass::ReleaseGroup;
            }
        }
    }

    fn identify_keywords(&mut self) {
        for i in 0..self.tokens.len() {
            if self.tokens[i].class != TokenClass::Unknown {
                continue;
            }
            let t = &self.tokens[i];

            if is_checksum(t) {
                self.tokens[i].class = TokenClass::Checksum;
                continue;
            }
            if RE_RESOLUTION.is_match(&t.value) {
                self.tokens[i].class = TokenClass::Resolution;
                continue;
            }
            if t.is_numeric() && t.value.len() == 4 {
                if let Ok(y) = t.value.parse::<i32>() {
                    if (1900..=2100).contains(&y) {
                        self.tokens[i].class = TokenClass::Year;
                        continue;
                    }
                }
            }
            if let Some(cat) = keywords::classify(&t.upper) {
                // Ambiguous keywords are only trusted inside brackets.
                if t.enclosed || !keywords::is_ambiguous(&t.upper) {
                    self.tokens[i].class = TokenClass::Keyword(cat);
                }
                continue;
            }
        }
    }

    /// Handles `SxxExx`, `NxNN`, combined (`S02`) and separated
    /// ("Season 2", "2nd Season", "Part 2", "Vol 3") number prefixes.
    fn identify_prefixed_numbers(&mut self) {
        for i in 0..self.tokens.len() {
            if self.tokens[i].class != TokenClass::Unknown {
                continue;
            }
            let upper = self.tokens[i].upper.clone();

            if let Some(caps) = RE_SXX_EXX.captures(&upper) {
                self.data.season = normalize_number(&caps[1]);
                if let Some(s2) = caps.get(2) {
                    self.data.season_range =
                        vec![self.data.season.clone(), normalize_number(s2.as_str())];
                }
                self.data.episode = normalize_number(&caps[3]);
                if let Some(e2) = caps.get(4) {
                    self.data.other_episode = normalize_number(e2.as_str());
                }
                if let Some(v) = caps.get(5) {
                    self.data.release_version = v.as_str().to_string();
                }
                self.tokens[i].class = TokenClass::Episode;
                self.episode_index = Some(i);
                continue;
            }

            if let Some(caps) = RE_NXNN.captures(&upper) {
                self.data.season = normalize_number(&caps[1]);
                self.data.episode = normalize_number(&caps[2]);
                self.tokens[i].class = TokenClass::Episode;
                self.episode_index = Some(i);
                continue;
            }

            if let Some(caps) = RE_SEASON_COMBINED.captures(&upper) {
                // "S2" alone; skip bare "S"
                self.data.season = normalize_number(&caps[1]);
                if let Some(s2) = caps.get(2) {
                    self.data.season_range =
                        vec![self.data.season.clone(), normalize_number(s2.as_str())];
                }
                self.tokens[i].class = TokenClass::Season;
                continue;
            }

            // "Season 2" / "Saison 2"
            if keywords::is_season_prefix(&upper) {
                if let Some(n) = self.take_following_number(i) {
                    self.data.season = n;
                    self.tokens[i].class = TokenClass::Consumed;
                }
                continue;
            }
            // "2nd Season"
            if let Some(ord) = keywords::ordinal_number(&upper) {
                if self
                    .tokens
                    .get(i + 1)
                    .is_some_and(|t| keywords::is_season_prefix(&t.upper))
                {
                    self.data.season = ord.to_string();
                    self.tokens[i].class = TokenClass::Consumed;
                    self.tokens[i + 1].class = TokenClass::Consumed;
                }
                continue;
            }
            if keywords::is_part_prefix(&upper) {
                if let Some(n) = self.take_following_number(i) {
                    self.data.part = n;
                    self.tokens[i].class = TokenClass::Consumed;
                }
                continue;
            }
            if keywords::is_volume_prefix(&upper) {
                if let Some(n) = self.take_following_number(i) {
                    self.data.volume = n;
                    self.tokens[i].class = TokenClass::Consumed;
                }
                continue;
            }
            if keywords::is_episode_prefix(&upper) {
                if let Some(j) = self.following_number_index(i) {
                    self.tokens[i].class = TokenClass::Consumed;
                    self.tokens[j].class = TokenClass::Episode;
                    if self.episode_index.is_none() {
                        self.episode_index = Some(j);
                        self.data.episode = normalize_number(&self.tokens[j].value.clone());
                    }
                }
                continue;
            }
            if let Some(caps) = RE_EPISODE_COMBINED.captures(&upper) {
                if self.episode_index.is_none() {
                    self.data.episode = normalize_number(&caps[1]);
                    if let Some(v) = caps.get(2) {
                        self.data.release_version = v.as_str().to_string();
                    }
                    self.tokens[i].class = TokenClass::Episode;
                    self.episode_index = Some(i);
                }
                continue;
            }
        }
    }

    fn following_number_index(&self, i: usize) -> Option<usize> {
        let next = self.tokens.get(i + 1)?;
        if next.class == TokenClass::Unknown && next.is_numeric() {
            Some(i + 1)
        } else {
            None
        }
    }

    fn take_following_number(&mut self, i: usize) -> Option<String> {
        let j = self.following_number_index(i)?;
        self.tokens[j].class = TokenClass::Consumed;
        Some(normalize_number(&self.tokens[j].value.clone()))
    }

    /// Pick the episode from the remaining numeric runs: the later run wins;
    /// an earlier `SxxExx`/prefixed match overrides loose guesses.
    fn select_episode(&mut self) {
        if self.episode_index.is_some() {
            self.mark_alt_episode();
            return;
        }

        let mut candidates: Vec<usize> = Vec::new();
        for (i, t) in self.tokens.iter().enumerate() {
            if t.class != TokenClass::Unknown || t.enclosed {
                continue;
            }
            if t.is_numeric() || RE_RANGE.is_match(&t.value) || RE_NUM_VERSION.is_match(&t.upper) {
                candidates.push(i);
            }
        }
        // Fall back to enclosed numbers outside the release group, e.g. "[01]".
        if candidates.is_empty() {
            for (i, t) in self.tokens.iter().enumerate() {
                if t.class == TokenClass::Unknown && t.enclosed && t.is_numeric() {
                    candidates.push(i);
                }
            }
        }
        let Some(&i) = candidates.last() else {
            return;
        };
        let value = self.tokens[i].value.clone();
        let upper = self.tokens[i].upper.clone();

        if let Some(caps) = RE_RANGE.captures(&value) {
            self.data.episode = normalize_number(&caps[1]);
            self.data.other_episode = normalize_number(&caps[2]);
        } else if let Some(caps) = RE_NUM_VERSION.captures(&upper) {
            self.data.episode = normalize_number(&caps[1]);
            self.data.release_version = caps[2].to_string();
        } else {
            self.data.episode = normalize_number(&value);
        }
        self.tokens[i].class = TokenClass::Episode;
        self.episode_index = Some(i);
        self.mark_alt_episode();
    }

    /// An enclosed bare number directly after the episode token is an
    /// alternate (absolute) episode number.
    fn mark_alt_episode(&mut self) {
        let Some(i) = self.episode_index else { return };
        let alt = match self.tokens.get(i + 1) {
            Some(t) if t.enclosed && t.is_numeric() && t.class == TokenClass::Unknown => {
                Some(normalize_number(&t.value))
            }
            _ => None,
        };
        if let Some(alt) = alt {
            self.data.alt_episode = alt;
            self.tokens[i + 1].class = TokenClass::AltEpisode;
        }
    }

    /// The title is every unclassified unenclosed token before the first
    /// significant token, minus trailing delimiters.
    fn identify_title(&mut self) {
        let end = self
            .tokens
            .iter()
            .position(|t| {
                !t.enclosed
                    && !matches!(t.class, TokenClass::Unknown | TokenClass::ReleaseGroup)
            })
            .unwrap_or(self.tokens.len());

        let mut parts: Vec<String> = Vec::new();
        for t in &self.tokens[..end] {
            if t.enclosed || t.class != TokenClass::Unknown {
                continue;
            }
            parts.push(t.value.clone());
        }
        let title = parts.join(" ");
        self.data.title = title.trim().trim_end_matches('-').trim().to_string();

        // Episode title: unclassified tokens between the episode and the
        // first keyword token.
        if let Some(ep) = self.episode_index {
            let mut parts: Vec<String> = Vec::new();
            for t in &self.tokens[ep + 1..] {
                if t.enclosed {
                    continue;
                }
                if t.class != TokenClass::Unknown {
                    break;
                }
                parts.push(t.value.clone());
            }
            self.data.episode_title = parts.join(" ").trim().trim_end_matches('-').trim().to_string();
        }
    }

    fn collect(&mut self) {
        for t in &self.tokens {
            match t.class {
                TokenClass::ReleaseGroup => {
                    if self.data.release_group.is_empty() {
                        self.data.release_group = t.value.clone();
                    } else {
                        self.data.release_group =
                            format!("{} {}", self.data.release_group, t.value);
                    }
                }
                TokenClass::Resolution => {
                    if self.data.resolution.is_empty() {
                        self.data.resolution = t.value.clone();
                    }
                }
                TokenClass::Checksum => self.data.checksum = t.value.clone(),
                TokenClass::Year => {
                    if self.data.year.is_empty() {
                        self.data.year = t.value.clone();
                    }
                }
                TokenClass::Keyword(cat) => {
                    let v = t.value.clone();
                    match cat {
                        KeywordCategory::AudioTerm => self.data.audio.push(v),
                        KeywordCategory::VideoTerm => self.data.video_terms.push(v),
                        KeywordCategory::Source => self.data.source.push(v),
                        KeywordCategory::Language => self.data.language.push(v),
                        KeywordCategory::Subtitles => self.data.subtitles.push(v),
                        KeywordCategory::AnimeType => self.data.anime_type.push(v),
                        KeywordCategory::ReleaseInformation => {
                            self.data.release_information.push(v)
                        }
                        KeywordCategory::DeviceCompat => {}
                    }
                }
                _ => {}
            }
        }
    }
}

fn strip_extension(name: &str, data: &mut ParsedData) -> String {
    if let Some(idx) = name.rfind('.') {
        let ext = &name[idx + 1..];
        if keywords::is_video_extension(ext) {
            data.extension = ext.to_lowercase();
            return name[..idx].to_string();
        }
    }
    name.to_string()
}

fn is_checksum(t: &Token) -> bool {
    t.enclosed && t.value.len() == 8 && t.value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Strip leading zeros, keeping a single zero.
fn normalize_number(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split on delimiters `[]()_. ` while tracking bracket depth. A dash is
/// kept inside a token only between digits (ranges like `12-13`).
fn tokenize(name: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;

    let chars: Vec<char> = name.chars().collect();
    let flush = |current: &mut String, tokens: &mut Vec<Token>, depth: i32| {
        if !current.is_empty() {
            tokens.push(Token::new(std::mem::take(current), depth > 0));
        }
    };

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '[' | '(' | '{' => {
                flush(&mut current, &mut tokens, depth);
                depth += 1;
            }
            ']' | ')' | '}' => {
                flush(&mut current, &mut tokens, depth);
                depth = (depth - 1).max(0);
            }
            ' ' | '_' | '.' | ',' | '+' => flush(&mut current, &mut tokens, depth),
            '-' => {
                let prev_digit = current.chars().last().is_some_and(|p| p.is_ascii_digit());
                let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                if prev_digit && next_digit {
                    current.push('-');
                } else {
                    flush(&mut current, &mut tokens, depth);
                }
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut tokens, depth);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sxxexx_with_version() {
        let p = parse("[Judas] Blue Lock - S01E03v2.mkv");
        assert_eq!(p.title, "Blue Lock");
        assert_eq!(p.season, "1");
        assert_eq!(p.episode, "3");
        assert_eq!(p.release_version, "2");
        assert_eq!(p.release_group, "Judas");
        assert_eq!(p.extension, "mkv");
    }

    #[test]
    fn test_episode_range() {
        let p = parse("[Group] Show - 12-13 [1080p].mkv");
        assert_eq!(p.title, "Show");
        assert_eq!(p.episode, "12");
        assert_eq!(p.other_episode, "13");
        assert_eq!(p.resolution, "1080p");
        assert_eq!(p.release_group, "Group");
    }

    #[test]
    fn test_loose_episode_number() {
        let p = parse("[SubsPlease] Sousou no Frieren - 05 (1080p) [ABCD1234].mkv");
        assert_eq!(p.title, "Sousou no Frieren");
        assert_eq!(p.episode, "5");
        assert_eq!(p.resolution, "1080p");
        assert_eq!(p.checksum, "ABCD1234");
        assert_eq!(p.release_group, "SubsPlease");
    }

    #[test]
    fn test_later_numeric_run_wins() {
        let p = parse("Mob Psycho 100 - 09.mkv");
        assert_eq!(p.episode, "9");
        assert_eq!(p.title, "Mob Psycho 100");
    }

    #[test]
    fn test_year_is_not_episode() {
        let p = parse("Violet Evergarden (2018) - 03.mkv");
        assert_eq!(p.year, "2018");
        assert_eq!(p.episode, "3");
        assert_eq!(p.title, "Violet Evergarden");
    }

    #[test]
    fn test_separated_season() {
        let p = parse("Spice and Wolf Season 2 - 04.mkv");
        assert_eq!(p.season, "2");
        assert_eq!(p.episode, "4");
        assert_eq!(p.title, "Spice and Wolf");
    }

    #[test]
    fn test_ordinal_season() {
        let p = parse("Oshi no Ko 2nd Season - 01 [1080p].mkv");
        assert_eq!(p.season, "2");
        assert_eq!(p.episode, "1");
        assert_eq!(p.title, "Oshi no Ko");
    }

    #[test]
    fn test_folder_name_without_extension() {
        let p = parse("Blue Lock Season 1");
        assert_eq!(p.title, "Blue Lock");
        assert_eq!(p.season, "1");
        assert!(p.episode.is_empty());
        assert!(p.extension.is_empty());
    }

    #[test]
    fn test_keyword_bags() {
        let p = parse("[Group] Title - 07 [BD 1080p HEVC FLAC].mkv");
        assert_eq!(p.episode, "7");
        assert_eq!(p.resolution, "1080p");
        assert_eq!(p.source, vec!["BD"]);
        assert_eq!(p.video_terms, vec!["HEVC"]);
        assert_eq!(p.audio, vec!["FLAC"]);
    }

    #[test]
    fn test_anime_type_special() {
        let p = parse("[Group] Title - OVA 2 [720p].mkv");
        assert!(p.anime_type.iter().any(|t| t.eq_ignore_ascii_case("OVA")));
        assert_eq!(p.episode, "2");
    }

    #[test]
    fn test_movie_no_episode() {
        let p = parse("Kimi no Na wa (2016) [BD 1080p].mkv");
        assert_eq!(p.title, "Kimi no Na wa");
        assert_eq!(p.year, "2016");
        assert!(p.episode.is_empty());
    }

    #[test]
    fn test_never_fails_on_garbage() {
        let p = parse("]][[((--..__..--))]]");
        assert_eq!(p.title, "");
        assert!(!p.has_episode());
    }

    #[test]
    fn test_nxnn_pattern() {
        let p = parse("Show 2x05.mkv");
        assert_eq!(p.season, "2");
        assert_eq!(p.episode, "5");
    }

    #[test]
    fn test_batch_detection() {
        let p = parse("[Group] Show - 01-12 [Batch][1080p].mkv");
        assert!(p.is_batch());
        assert_eq!(p.episode, "1");
        assert_eq!(p.other_episode, "12");
    }
}
