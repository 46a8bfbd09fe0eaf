//! Local file entity
//!
//! The canonical unit produced by scanning. Created by the scanner, mutated
//! only through the library store, removed when the path is gone from disk
//! and the user confirms.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::parser::{self, ParsedData};

/// Classification of a local file within its media entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalFileKind {
    #[default]
    Main,
    Special,
    /// Opening/ending/other non-content video
    Nc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFileMetadata {
    pub episode: i32,
    /// AniDB episode key: "1", "2", ... for main episodes, "S1" for specials.
    #[serde(default)]
    pub anidb_episode: String,
    #[serde(default)]
    pub kind: LocalFileKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
    /// Absolute path as found on disk
    pub path: String,
    /// Lowercased, forward-slash path used for identity comparisons
    pub normalized_path: String,
    /// File name including extension
    pub name: String,
    pub parsed_data: ParsedData,
    /// Parsed data of each ancestor folder, outermost first
    #[serde(default)]
    pub parsed_folder_data: Vec<ParsedData>,
    /// 0 = unmatched
    #[serde(default)]
    pub media_id: i64,
    /// User-asserted match: the media id survives rescans
    #[serde(default)]
    pub locked: bool,
    /// Skipped entirely; still occupies a row
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub metadata: LocalFileMetadata,
}

impl LocalFile {
    /// Build a local file from an absolute path, parsing the file name and
    /// every folder between it and the library root.
    pub fn new(path: &Path, library_root: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut parsed_folder_data = Vec::new();
        if let Ok(relative) = path.strip_prefix(library_root) {
            for component in relative.components() {
                let part = component.as_os_str().to_string_lossy();
                if part == name.as_str() {
                    continue;
                }
                parsed_folder_data.push(parser::parse(&part));
            }
        }

        let path_str = path.to_string_lossy().to_string();
        Self {
            normalized_path: normalize_path(&path_str),
            parsed_data: parser::parse(&name),
            parsed_folder_data,
            path: path_str,
            name,
            ..Default::default()
        }
    }

    pub fn is_matched(&self) -> bool {
        self.media_id != 0
    }

    pub fn is_main(&self) -> bool {
        self.metadata.kind == LocalFileKind::Main
    }

    /// Parsed title, preferring the innermost folder title.
    pub fn parsed_title(&self) -> String {
        if let Some(folder) = self.parsed_folder_data.iter().rev().find(|p| !p.title.is_empty()) {
            return folder.title.clone();
        }
        self.parsed_data.title.clone()
    }

    /// Season parsed from the file name, falling back to folder data.
    pub fn season(&self) -> Option<i32> {
        self.parsed_data.season_number().or_else(|| {
            self.parsed_folder_data
                .iter()
                .rev()
                .find_map(|p| p.season_number())
        })
    }

    pub fn year(&self) -> Option<i32> {
        self.parsed_data.year_number().or_else(|| {
            self.parsed_folder_data
                .iter()
                .rev()
                .find_map(|p| p.year_number())
        })
    }

    pub fn episode_number(&self) -> Option<i32> {
        self.parsed_data.episode_number()
    }

    /// Whether the parsed name flags this as a special/OVA.
    pub fn looks_special(&self) -> bool {
        self.parsed_data
            .anime_type
            .iter()
            .any(|t| matches!(t.to_uppercase().as_str(), "OVA" | "OAV" | "OAD" | "SP" | "SPECIAL" | "SPECIALS"))
    }

    /// Whether the parsed name flags this as an OP/ED or similar.
    pub fn looks_nc(&self) -> bool {
        self.parsed_data.anime_type.iter().any(|t| {
            matches!(
                t.to_uppercase().as_str(),
                "OP" | "OPENING" | "NCOP" | "ED" | "ENDING" | "NCED" | "OPED" | "PV" | "PREVIEW"
                    | "CM" | "MENU" | "LOGO" | "SPOT" | "EVENT"
            )
        })
    }

    /// Title variations used by the matcher: parsed and folder titles, with
    /// season/part/year decorated forms. Season and year act as a scoring
    /// boost through these variations rather than as hard filters.
    pub fn title_variations(&self) -> Vec<String> {
        let mut variations: Vec<String> = Vec::new();
        let mut push = |v: String| {
            let v = v.trim().to_string();
            if !v.is_empty() && !variations.contains(&v) {
                variations.push(v);
            }
        };

        let file_title = self.parsed_data.title.clone();
        let folder_title = self
            .parsed_folder_data
            .iter()
            .rev()
            .find(|p| !p.title.is_empty())
            .map(|p| p.title.clone())
            .unwrap_or_default();
        let season = self.season();
        let part = self.parsed_data.part.parse::<i32>().ok();
        let year = self.year();

        for base in [file_title, folder_title] {
            if base.is_empty() {
                continue;
            }
            push(base.clone());
            if let Some(y) = year {
                push(format!("{base} ({y})"));
            }
            if let Some(s) = season {
                if s > 1 {
                    push(format!("{base} Season {s}"));
                    push(format!("{base} S{s}"));
                    push(format!("{base} {s}"));
                    push(format!("{base} {s}{} Season", ordinal_suffix(s)));
                }
            }
            if let Some(p) = part {
                if p > 0 {
                    push(format!("{base} Part {p}"));
                    push(format!("{base} Cour {p}"));
                }
            }
        }
        variations
    }
}

fn ordinal_suffix(n: i32) -> &'static str {
    match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Lowercase on case-insensitive filesystems and normalise separators so
/// two spellings of one path compare equal.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str, root: &str) -> LocalFile {
        LocalFile::new(&PathBuf::from(path), &PathBuf::from(root))
    }

    #[test]
    fn test_new_parses_name_and_folders() {
        let lf = file(
            "/mnt/anime/Blue Lock/Season 1/[Judas] Blue Lock - S01E03.mkv",
            "/mnt/anime",
        );
        assert_eq!(lf.name, "[Judas] Blue Lock - S01E03.mkv");
        assert_eq!(lf.parsed_data.episode, "3");
        assert_eq!(lf.parsed_folder_data.len(), 2);
        assert_eq!(lf.parsed_folder_data[0].title, "Blue Lock");
        assert_eq!(lf.parsed_folder_data[1].season, "1");
        assert_eq!(lf.normalized_path, "/mnt/anime/blue lock/season 1/[judas] blue lock - s01e03.mkv");
    }

    #[test]
    fn test_parsed_title_prefers_folder() {
        let lf = file("/mnt/anime/Frieren/[Grp] 01.mkv", "/mnt/anime");
        assert_eq!(lf.parsed_title(), "Frieren");
    }

    #[test]
    fn test_title_variations_include_season_forms() {
        let lf = file("/mnt/anime/Show/Show Season 2 - 05.mkv", "/mnt/anime");
        let variations = lf.title_variations();
        assert!(variations.contains(&"Show Season 2".to_string()));
        assert!(variations.contains(&"Show 2nd Season".to_string()));
        assert!(variations.contains(&"Show".to_string()));
    }

    #[test]
    fn test_nc_detection() {
        let lf = file("/mnt/anime/Show/Show - NCOP.mkv", "/mnt/anime");
        assert!(lf.looks_nc());
        assert!(!lf.looks_special());
    }
}
