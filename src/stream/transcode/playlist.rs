//! HLS playlist generation
//!
//! The master playlist advertises a VIDEO variant per supported quality at
//! or below the source height plus an AUDIO rendition per audio stream.
//! Variant playlists derive their segment boundaries from the cached
//! keyframe list: boundaries are keyframe-aligned with a minimum segment
//! length, and the EXTINF durations sum to the source duration.

use serde::{Deserialize, Serialize};

use super::probe::MediaInfo;

/// Segments shorter than this are merged into the next keyframe gap.
pub const MIN_SEGMENT_LENGTH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    P240,
    P360,
    P480,
    P720,
    P1080,
    /// Transmux only, no scaling or re-encode of the video track
    Original,
}

impl VideoQuality {
    pub fn all() -> &'static [VideoQuality] {
        &[
            VideoQuality::P240,
            VideoQuality::P360,
            VideoQuality::P480,
            VideoQuality::P720,
            VideoQuality::P1080,
            VideoQuality::Original,
        ]
    }

    pub fn height(&self) -> u32 {
        match self {
            VideoQuality::P240 => 240,
            VideoQuality::P360 => 360,
            VideoQuality::P480 => 480,
            VideoQuality::P720 => 720,
            VideoQuality::P1080 => 1080,
            VideoQuality::Original => u32::MAX,
        }
    }

    /// Average bitrate in bits/s used for BANDWIDTH attributes.
    pub fn bitrate(&self) -> u64 {
        match self {
            VideoQuality::P240 => 400_000,
            VideoQuality::P360 => 800_000,
            VideoQuality::P480 => 1_200_000,
            VideoQuality::P720 => 2_400_000,
            VideoQuality::P1080 => 5_000_000,
            VideoQuality::Original => 8_000_000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoQuality::P240 => "240p",
            VideoQuality::P360 => "360p",
            VideoQuality::P480 => "480p",
            VideoQuality::P720 => "720p",
            VideoQuality::P1080 => "1080p",
            VideoQuality::Original => "original",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "240p" => Some(VideoQuality::P240),
            "360p" => Some(VideoQuality::P360),
            "480p" => Some(VideoQuality::P480),
            "720p" => Some(VideoQuality::P720),
            "1080p" => Some(VideoQuality::P1080),
            "original" => Some(VideoQuality::Original),
            _ => None,
        }
    }

    /// Qualities offered for a source of the given height: everything not
    /// exceeding it, plus `original`.
    pub fn available_for(height: u32) -> Vec<VideoQuality> {
        Self::all()
            .iter()
            .copied()
            .filter(|q| *q == VideoQuality::Original || q.height() <= height)
            .collect()
    }
}

/// Keyframe-aligned segment boundaries: every boundary is a keyframe, no
/// segment is shorter than [MIN_SEGMENT_LENGTH] (except possibly the last).
pub fn segment_boundaries(keyframes: &[f64], duration: f64) -> Vec<f64> {
    let mut boundaries = vec![0.0];
    let mut last = 0.0;
    for &kf in keyframes {
        if kf <= 0.0 {
            continue;
        }
        if kf >= duration {
            break;
        }
        if kf - last >= MIN_SEGMENT_LENGTH {
            boundaries.push(kf);
            last = kf;
        }
    }
    boundaries
}

/// Durations per segment; sums to `duration`.
pub fn segment_durations(boundaries: &[f64], duration: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(boundaries.len());
    for (i, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).copied().unwrap_or(duration);
        out.push(end - start);
    }
    out
}

/// The HLS master playlist for a probed source.
pub fn master_playlist(info: &MediaInfo, base: &str) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:6\n");

    for (i, audio) in info.audio_streams.iter().enumerate() {
        let name = if audio.title.is_empty() {
            format!("Audio {}", i + 1)
        } else {
            audio.title.clone()
        };
        out.push_str(&format!(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"{name}\",LANGUAGE=\"{lang}\",{default}URI=\"{base}/audio/{i}/index.m3u8\"\n",
            lang = audio.language,
            default = if audio.is_default { "DEFAULT=YES," } else { "DEFAULT=NO," },
        ));
    }

    let audio_attr = if info.audio_streams.is_empty() {
        String::new()
    } else {
        ",AUDIO=\"audio\"".to_string()
    };

    for quality in VideoQuality::available_for(info.video.height) {
        let height = if quality == VideoQuality::Original {
            info.video.height
        } else {
            quality.height()
        };
        let width =
            (info.video.width as u64 * height as u64 / info.video.height.max(1) as u64) as u32;
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION={width}x{height}{audio_attr}\n",
            bandwidth = quality.bitrate(),
        ));
        out.push_str(&format!("{base}/{}/index.m3u8\n", quality.name()));
    }
    out
}

/// A variant (or audio rendition) media playlist.
pub fn media_playlist(boundaries: &[f64], duration: f64, segment_prefix: &str) -> String {
    let durations = segment_durations(boundaries, duration);
    let target = durations.iter().copied().fold(0.0, f64::max).ceil() as u64;

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:6\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    out.push_str("#EXT-X-START:TIME-OFFSET=0\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    for (i, d) in durations.iter().enumerate() {
        out.push_str(&format!("#EXTINF:{d:.6}\n{segment_prefix}-{i}.ts\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transcode::probe::{AudioStreamInfo, VideoStreamInfo};

    #[test]
    fn test_segment_boundaries_spec_scenario() {
        // 600 s source with keyframes every 4 s: 75 segments of ~8 s whose
        // durations sum to the duration.
        let keyframes: Vec<f64> = (0..150).map(|i| i as f64 * 4.0).collect();
        let boundaries = segment_boundaries(&keyframes, 600.0);
        assert_eq!(boundaries.len(), 75);
        let durations = segment_durations(&boundaries, 600.0);
        assert_eq!(durations.len(), 75);
        for d in &durations {
            assert!((*d - 8.0).abs() < 1e-9);
        }
        let total: f64 = durations.iter().sum();
        assert!((total - 600.0).abs() < 1.0 / 23.976);
    }

    #[test]
    fn test_boundaries_are_keyframes() {
        let keyframes = vec![0.0, 2.0, 4.5, 9.0, 11.0, 16.0];
        let boundaries = segment_boundaries(&keyframes, 20.0);
        for b in &boundaries {
            assert!(keyframes.contains(b));
        }
        // Every gap except the last respects the minimum.
        let durations = segment_durations(&boundaries, 20.0);
        for d in &durations[..durations.len() - 1] {
            assert!(*d >= MIN_SEGMENT_LENGTH);
        }
    }

    #[test]
    fn test_durations_sum_to_duration() {
        let keyframes = vec![0.0, 3.0, 7.1, 12.9, 18.0, 21.5];
        let boundaries = segment_boundaries(&keyframes, 25.3);
        let total: f64 = segment_durations(&boundaries, 25.3).iter().sum();
        assert!((total - 25.3).abs() < 1e-9);
    }

    #[test]
    fn test_available_qualities() {
        let qualities = VideoQuality::available_for(720);
        assert!(qualities.contains(&VideoQuality::P720));
        assert!(qualities.contains(&VideoQuality::Original));
        assert!(!qualities.contains(&VideoQuality::P1080));
    }

    #[test]
    fn test_master_playlist_contents() {
        let info = MediaInfo {
            duration: 600.0,
            video: VideoStreamInfo {
                width: 1920,
                height: 1080,
                ..Default::default()
            },
            audio_streams: vec![AudioStreamInfo {
                index: 0,
                language: "jpn".to_string(),
                is_default: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let m3u8 = master_playlist(&info, "/api/v1/mediastream/transcode/abc");
        assert!(m3u8.contains("#EXT-X-MEDIA:TYPE=AUDIO"));
        assert!(m3u8.contains("RESOLUTION=1920x1080"));
        assert!(m3u8.contains("/1080p/index.m3u8"));
        assert!(m3u8.contains("/240p/index.m3u8"));
        assert!(!m3u8.contains("/4320p/"));
    }

    #[test]
    fn test_media_playlist_shape() {
        let boundaries = vec![0.0, 8.0, 16.0];
        let m3u8 = media_playlist(&boundaries, 24.0, "segment");
        assert!(m3u8.contains("#EXT-X-TARGETDURATION:8"));
        assert!(m3u8.contains("#EXTINF:8.000000\nsegment-0.ts"));
        assert!(m3u8.contains("segment-2.ts"));
        assert!(m3u8.ends_with("#EXT-X-ENDLIST\n"));
    }
}
