//! Closed keyword lexicon for the filename parser
//!
//! Tokens are compared uppercase. Categories mirror the metadata fields on
//! [super::ParsedData].

/// Category assigned to a recognised keyword token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordCategory {
    AudioTerm,
    VideoTerm,
    Source,
    Language,
    Subtitles,
    AnimeType,
    ReleaseInformation,
    DeviceCompat,
}

const AUDIO_TERMS: &[&str] = &[
    "AAC", "AACX2", "AACX3", "AACX4", "AC3", "EAC3", "E-AC-3", "FLAC", "FLACX2", "FLACX3",
    "LOSSLESS", "MP3", "OGG", "VORBIS", "OPUS", "DTS", "DTS-ES", "DTS-HD", "DTS5.1", "TRUEHD",
    "TRUEHD5.1", "ATMOS", "DDP", "DD", "DD2.0", "DD5.1", "DUALAUDIO", "DUAL-AUDIO", "DUAL",
    "2CH", "5.1", "5.1CH", "2.0", "7.1",
];

const VIDEO_TERMS: &[&str] = &[
    "H264", "H.264", "X264", "X.264", "AVC", "H265", "H.265", "X265", "X.265", "HEVC", "AV1",
    "XVID", "DIVX", "HI10P", "HI10", "HI444", "HI444P", "HI444PP", "10BIT", "10BITS", "10-BIT",
    "8BIT", "8BITS", "8-BIT", "HDR", "HDR10", "DOLBYVISION", "60FPS", "120FPS", "23.976FPS",
    "29.97FPS", "WEBRIP-QUALITY", "HQ", "LQ",
];

const SOURCES: &[&str] = &[
    "BD", "BDRIP", "BLURAY", "BLU-RAY", "DVD", "DVD5", "DVD9", "DVDRIP", "DVD-RIP", "R2DVD",
    "R2J", "R2JDVD", "WEB", "WEBDL", "WEB-DL", "WEBRIP", "WEB-RIP", "HDTV", "HDTVRIP", "TVRIP",
    "TV-RIP", "CAM", "REMUX",
];

const LANGUAGES: &[&str] = &[
    "ENG", "ENGLISH", "ESPANOL", "SPANISH", "ITA", "ITALIAN", "JAP", "JPN", "JAPANESE", "PT-BR",
    "POR", "POLISH", "FRENCH", "VF", "VOSTFR", "GERMAN", "GER", "RUSSIAN", "RUS", "MULTI",
    "MULTIAUDIO", "MULTI-AUDIO",
];

const SUBTITLES: &[&str] = &[
    "SUB", "SUBS", "SUBBED", "SUBTITLED", "MULTISUB", "MULTI-SUB", "MULTISUBS", "DUBSUB",
    "ENGSUB", "ENGSUBS", "JAPSUB", "HARDSUB", "HARDSUBS", "SOFTSUB", "SOFTSUBS", "RAW", "CC",
    "SDH",
];

const ANIME_TYPES: &[&str] = &[
    "MOVIE", "GEKIJOUBAN", "TV", "OVA", "OAV", "OAD", "ONA", "SP", "SPECIAL", "SPECIALS", "OP",
    "OPENING", "NCOP", "ED", "ENDING", "NCED", "OPED", "PV", "PREVIEW", "EVENT", "TOKUTEN", "CM",
    "MENU", "LOGO", "SPOT",
];

const RELEASE_INFORMATION: &[&str] = &[
    "BATCH", "COMPLETE", "REMASTER", "REMASTERED", "UNCENSORED", "UNCUT", "PATCH", "REPACK",
    "PROPER", "FINAL", "LIMITED", "EXTENDED",
];

const DEVICE_COMPAT: &[&str] = &["ANDROID", "IPAD3", "IPHONE5", "IPOD", "PS3", "XBOX", "XBOX360"];

const VIDEO_EXTENSIONS: &[&str] = &[
    "MKV", "MP4", "AVI", "M4V", "MOV", "WMV", "FLV", "WEBM", "MPEG", "MPG", "TS", "M2TS", "OGM",
    "RMVB",
];

/// Tokens that are prone to false positives: only classified when enclosed
/// in brackets (e.g. do not flag "ITA" in "Bokura Ga Ita").
const AMBIGUOUS: &[&str] = &[
    "SP", "ANDROID", "ITA", "ESP", "FR", "EN", "RU", "CH", "JP", "TV", "OP", "ED", "DUAL", "RAW",
    "DD", "CC", "SUB", "WEB", "BD",
];

/// Classify an uppercase token against the closed lexicon.
pub fn classify(token: &str) -> Option<KeywordCategory> {
    if AUDIO_TERMS.contains(&token) {
        return Some(KeywordCategory::AudioTerm);
    }
    if VIDEO_TERMS.contains(&token) {
        return Some(KeywordCategory::VideoTerm);
    }
    if SOURCES.contains(&token) {
        return Some(KeywordCategory::Source);
    }
    if LANGUAGES.contains(&token) {
        return Some(KeywordCategory::Language);
    }
    if SUBTITLES.contains(&token) {
        return Some(KeywordCategory::Subtitles);
    }
    if ANIME_TYPES.contains(&token) {
        return Some(KeywordCategory::AnimeType);
    }
    if RELEASE_INFORMATION.contains(&token) {
        return Some(KeywordCategory::ReleaseInformation);
    }
    if DEVICE_COMPAT.contains(&token) {
        return Some(KeywordCategory::DeviceCompat);
    }
    None
}

/// True when the token should only be classified while enclosed in brackets.
pub fn is_ambiguous(token: &str) -> bool {
    AMBIGUOUS.contains(&token)
}

pub fn is_video_extension(token: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&token.to_uppercase().as_str())
}

/// Season prefixes separated from their number ("Season 2", "Saison 2").
pub fn is_season_prefix(token: &str) -> bool {
    matches!(token, "SEASON" | "SEASONS" | "SAISON" | "SAISONS")
}

/// Episode prefixes separated from their number ("Episode 3", "Ep 3").
pub fn is_episode_prefix(token: &str) -> bool {
    matches!(token, "EP" | "EPS" | "EPISODE" | "EPISODES" | "EPISODIO" | "CAPITULO")
}

pub fn is_part_prefix(token: &str) -> bool {
    matches!(token, "PART" | "PARTS" | "COUR")
}

pub fn is_volume_prefix(token: &str) -> bool {
    matches!(token, "VOL" | "VOLUME" | "VOLUMES")
}

/// Ordinal suffixes used by season/part phrasing ("2nd Season", "3rd Cour").
pub fn ordinal_number(token: &str) -> Option<i32> {
    let token = token.to_uppercase();
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let suffix = &token[digits.len()..];
    if matches!(suffix, "ST" | "ND" | "RD" | "TH") {
        digits.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_terms() {
        assert_eq!(classify("FLAC"), Some(KeywordCategory::AudioTerm));
        assert_eq!(classify("HEVC"), Some(KeywordCategory::VideoTerm));
        assert_eq!(classify("BDRIP"), Some(KeywordCategory::Source));
        assert_eq!(classify("VOSTFR"), Some(KeywordCategory::Language));
        assert_eq!(classify("MULTISUB"), Some(KeywordCategory::Subtitles));
        assert_eq!(classify("OVA"), Some(KeywordCategory::AnimeType));
        assert_eq!(classify("BATCH"), Some(KeywordCategory::ReleaseInformation));
        assert_eq!(classify("BLUE"), None);
    }

    #[test]
    fn test_ordinal() {
        assert_eq!(ordinal_number("2ND"), Some(2));
        assert_eq!(ordinal_number("3rd"), Some(3));
        assert_eq!(ordinal_number("11TH"), Some(11));
        assert_eq!(ordinal_number("2"), None);
        assert_eq!(ordinal_number("ND"), None);
    }

    #[test]
    fn test_ambiguous() {
        assert!(is_ambiguous("ITA"));
        assert!(!is_ambiguous("VOSTFR"));
    }
}
