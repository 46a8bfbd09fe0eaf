//! Media probing via ffprobe
//!
//! The source is probed once per hash: container/stream layout from the
//! JSON output, then the keyframe list from a packet scan. Both are cached
//! in the file cache so later sessions skip the scan.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// e.g. "24000/1001"
    pub frame_rate: String,
}

impl VideoStreamInfo {
    /// Frames per second as a float; 23.976 fallback.
    pub fn fps(&self) -> f64 {
        let mut parts = self.frame_rate.splitn(2, '/');
        let num: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
        let den: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1.0);
        if num > 0.0 && den > 0.0 {
            num / den
        } else {
            24000.0 / 1001.0
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Index among audio streams (0-based), not the container index
    pub index: usize,
    pub codec: String,
    pub language: String,
    pub title: String,
    pub channels: u32,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleStreamInfo {
    /// Index among subtitle streams (0-based)
    pub index: usize,
    pub codec: String,
    pub language: String,
    pub title: String,
    pub is_forced: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub path: String,
    pub container: String,
    pub duration: f64,
    pub video: VideoStreamInfo,
    pub audio_streams: Vec<AudioStreamInfo>,
    pub subtitle_streams: Vec<SubtitleStreamInfo>,
    pub keyframes: Vec<f64>,
}

/// Probe format and streams, then scan keyframes.
pub async fn probe(ffprobe_path: &str, path: &Path) -> Result<MediaInfo> {
    let output = Command::new(ffprobe_path)
        .args(["-v", "quiet"])
        .args(["-print_format", "json"])
        .args(["-show_format", "-show_streams"])
        .arg(path)
        .stdout(Stdio::piped())
        .output()
        .await
        .context("Failed to run ffprobe")?;
    anyhow::ensure!(output.status.success(), "ffprobe failed for {}", path.display());

    let raw: serde_json::Value =
        serde_json::from_slice(&output.stdout).context("ffprobe output is not JSON")?;

    let duration: f64 = raw["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);
    let container = raw["format"]["format_name"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let mut video = VideoStreamInfo::default();
    let mut audio_streams = Vec::new();
    let mut subtitle_streams = Vec::new();
    let mut have_video = false;

    for stream in raw["streams"].as_array().cloned().unwrap_or_default() {
        let codec_type = stream["codec_type"].as_str().unwrap_or_default();
        let codec = stream["codec_name"].as_str().unwrap_or_default().to_string();
        let tags = &stream["tags"];
        let language = tags["language"].as_str().unwrap_or("und").to_string();
        let title = tags["title"].as_str().unwrap_or_default().to_string();
        match codec_type {
            "video" if !have_video => {
                have_video = true;
                video = VideoStreamInfo {
                    index: stream["index"].as_u64().unwrap_or(0) as usize,
                    codec,
                    width: stream["width"].as_u64().unwrap_or(0) as u32,
                    height: stream["height"].as_u64().unwrap_or(0) as u32,
                    frame_rate: stream["r_frame_rate"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                };
            }
            "audio" => {
                audio_streams.push(AudioStreamInfo {
                    index: audio_streams.len(),
                    codec,
                    language,
                    title,
                    channels: stream["channels"].as_u64().unwrap_or(2) as u32,
                    is_default: stream["disposition"]["default"].as_i64() == Some(1),
                });
            }
            "subtitle" => {
                subtitle_streams.push(SubtitleStreamInfo {
                    index: subtitle_streams.len(),
                    codec,
                    language,
                    title,
                    is_forced: stream["disposition"]["forced"].as_i64() == Some(1),
                });
            }
            _ => {}
        }
    }
    anyhow::ensure!(have_video, "No video stream in {}", path.display());

    let keyframes = scan_keyframes(ffprobe_path, path, duration).await?;

    Ok(MediaInfo {
        path: path.to_string_lossy().to_string(),
        container,
        duration,
        video,
        audio_streams,
        subtitle_streams,
        keyframes,
    })
}

/// Keyframe timestamps from a packet scan of the first video stream.
async fn scan_keyframes(ffprobe_path: &str, path: &Path, duration: f64) -> Result<Vec<f64>> {
    let output = Command::new(ffprobe_path)
        .args(["-v", "quiet"])
        .args(["-select_streams", "v:0"])
        .args(["-show_entries", "packet=pts_time,flags"])
        .args(["-of", "csv=print_section=0"])
        .arg(path)
        .stdout(Stdio::piped())
        .output()
        .await
        .context("Failed to run ffprobe keyframe scan")?;
    anyhow::ensure!(output.status.success(), "Keyframe scan failed");

    let text = String::from_utf8_lossy(&output.stdout);
    let mut keyframes = parse_keyframe_scan(&text);
    if keyframes.is_empty() {
        // Containers without packet flags still need boundaries; synthesise
        // a fixed grid so segmentation can proceed.
        let mut t = 0.0;
        while t < duration {
            keyframes.push(t);
            t += 4.0;
        }
    }
    Ok(keyframes)
}

/// Parse `pts_time,flags` CSV lines, keeping keyframe timestamps.
pub fn parse_keyframe_scan(text: &str) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for line in text.lines() {
        let mut parts = line.trim().split(',');
        let (Some(ts), Some(flags)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !flags.contains('K') {
            continue;
        }
        if let Ok(ts) = ts.parse::<f64>() {
            out.push(ts);
        }
    }
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keyframe_scan() {
        let text = "0.000000,K_\n0.417083,__\n4.004000,K_\n8.008000,K_\nbad,K\n";
        let kf = parse_keyframe_scan(text);
        assert_eq!(kf, vec![0.0, 4.004, 8.008]);
    }

    #[test]
    fn test_fps() {
        let v = VideoStreamInfo {
            frame_rate: "24000/1001".to_string(),
            ..Default::default()
        };
        assert!((v.fps() - 23.976).abs() < 0.001);
        let v = VideoStreamInfo {
            frame_rate: "25".to_string(),
            ..Default::default()
        };
        assert_eq!(v.fps(), 25.0);
    }
}
