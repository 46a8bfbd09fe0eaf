//! Subtitle and attachment extraction
//!
//! One-shot per source hash: every text subtitle stream is extracted to a
//! file and container attachments (fonts) are dumped alongside, under the
//! per-hash directory. The manager guards the one-shot with a completion
//! cell so concurrent sessions share the same extraction.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

use super::probe::MediaInfo;

/// Extension used for an extracted subtitle stream.
fn subtitle_extension(codec: &str) -> &'static str {
    match codec {
        "ass" | "ssa" => "ass",
        "subrip" | "srt" => "srt",
        "webvtt" => "vtt",
        _ => "srt",
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSubtitle {
    pub index: usize,
    pub language: String,
    pub title: String,
    pub file_name: String,
}

/// Extract subtitles and attachments for a probed source into `dir`.
pub async fn extract_all(
    ffmpeg_path: &str,
    info: &MediaInfo,
    dir: &Path,
) -> Result<Vec<ExtractedSubtitle>> {
    tokio::fs::create_dir_all(dir).await.ok();
    let attachments_dir = dir.join("attachments");
    tokio::fs::create_dir_all(&attachments_dir).await.ok();

    let mut extracted = Vec::new();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-nostats".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        info.path.clone(),
    ];
    for sub in &info.subtitle_streams {
        // Image subtitles (PGS/VobSub) cannot become text files; skip them.
        if matches!(sub.codec.as_str(), "hdmv_pgs_subtitle" | "dvd_subtitle") {
            continue;
        }
        let ext = subtitle_extension(&sub.codec);
        let file_name = format!("{}.{}.{ext}", sub.index, sanitize_language(&sub.language));
        args.push("-map".into());
        args.push(format!("0:s:{}", sub.index));
        args.push(dir.join(&file_name).to_string_lossy().to_string());
        extracted.push(ExtractedSubtitle {
            index: sub.index,
            language: sub.language.clone(),
            title: sub.title.clone(),
            file_name,
        });
    }

    if !extracted.is_empty() {
        let output = Command::new(ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run ffmpeg for subtitle extraction")?;
        if !output.status.success() {
            tracing::warn!(
                path = %info.path,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Subtitle extraction failed"
            );
            extracted.clear();
        }
    }

    // Attachments (fonts) are dumped with a separate invocation; failure
    // here only degrades styling.
    let status = Command::new(ffmpeg_path)
        .current_dir(&attachments_dir)
        .args([
            "-y",
            "-nostats",
            "-hide_banner",
            "-loglevel",
            "error",
            "-dump_attachment:t",
            "",
            "-i",
            &info.path,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        tracing::debug!(error = %e, "Attachment dump failed");
    }

    Ok(extracted)
}

/// List previously extracted subtitle files under a hash directory.
pub async fn list_extracted(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".ass") || name.ends_with(".srt") || name.ends_with(".vtt") {
                out.push(name);
            }
        }
    }
    out.sort();
    out
}

fn sanitize_language(language: &str) -> String {
    let cleaned: String = language
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if cleaned.is_empty() {
        "und".to_string()
    } else {
        cleaned
    }
}

/// Extracted attachment path, guarded against directory traversal.
pub fn attachment_path(dir: &Path, name: &str) -> Option<PathBuf> {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return None;
    }
    Some(dir.join("attachments").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitle_extension() {
        assert_eq!(subtitle_extension("ass"), "ass");
        assert_eq!(subtitle_extension("subrip"), "srt");
        assert_eq!(subtitle_extension("mystery"), "srt");
    }

    #[test]
    fn test_attachment_path_traversal_rejected() {
        let dir = PathBuf::from("/data/transcode/abc");
        assert!(attachment_path(&dir, "../secret").is_none());
        assert!(attachment_path(&dir, "font.ttf").is_some());
    }

    #[test]
    fn test_sanitize_language() {
        assert_eq!(sanitize_language("jpn"), "jpn");
        assert_eq!(sanitize_language(""), "und");
        assert_eq!(sanitize_language("en/../.."), "en");
    }
}
