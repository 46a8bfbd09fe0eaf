//! Segment scheduler
//!
//! One `TranscodeStream` exists per (source, video quality) and per
//! (source, audio index). Segment readiness is tracked per segment with a
//! watch channel; ffmpeg "heads" transcode forward from a start segment and
//! report finished segments on stdout via `-segment_list pipe:1`. A request
//! for a segment that no running head will reach soon spawns a new head at
//! the nearest keyframe; requests for scheduled segments wait with a
//! timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use super::playlist::VideoQuality;

/// Max wait for a scheduled segment before the request gives up.
const SEGMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(25);
/// A head further than this (seconds of content) from the requested
/// segment does not count as "will reach it soon".
const MAX_ENCODER_DISTANCE: f64 = 60.0;
/// Segments per ffmpeg invocation.
const SEGMENTS_PER_HEAD: usize = 100;
/// How many upcoming segments a successful request pre-schedules.
const PREFETCH_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video(VideoQuality),
    Audio(usize),
}

impl StreamKind {
    pub fn dir_name(&self) -> String {
        match self {
            StreamKind::Video(q) => q.name().to_string(),
            StreamKind::Audio(i) => format!("audio-{i}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("segment wait timed out")]
    Timeout,
    #[error("transcoder errored: {0}")]
    Errored(String),
    #[error("{0}")]
    Other(String),
}

struct Segment {
    tx: watch::Sender<bool>,
}

struct Head {
    start: usize,
    current: usize,
    end: usize,
}

pub struct TranscodeStream {
    kind: StreamKind,
    input: PathBuf,
    out_dir: PathBuf,
    boundaries: Arc<Vec<f64>>,
    duration: f64,
    ffmpeg_path: String,
    segments: Vec<Segment>,
    heads: Arc<Mutex<Vec<Head>>>,
    kill_tx: watch::Sender<bool>,
    errored: Arc<AtomicBool>,
}

impl TranscodeStream {
    pub fn new(
        kind: StreamKind,
        input: PathBuf,
        out_dir: PathBuf,
        boundaries: Arc<Vec<f64>>,
        duration: f64,
        ffmpeg_path: String,
    ) -> Self {
        let segments = (0..boundaries.len())
            .map(|_| {
                let (tx, _) = watch::channel(false);
                Segment { tx }
            })
            .collect();
        let (kill_tx, _) = watch::channel(false);
        Self {
            kind,
            input,
            out_dir,
            boundaries,
            duration,
            ffmpeg_path,
            segments,
            heads: Arc::new(Mutex::new(Vec::new())),
            kill_tx,
            errored: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        self.out_dir.join(format!("segment-{index}.ts"))
    }

    fn is_ready(&self, index: usize) -> bool {
        self.segments
            .get(index)
            .is_some_and(|s| *s.tx.subscribe().borrow())
    }

    /// Seconds of content between the requested segment and the closest
    /// head that will pass it; infinite when none will.
    fn min_head_distance(&self, index: usize) -> f64 {
        let target = self.boundaries[index];
        let heads = self.heads.lock();
        heads
            .iter()
            .filter(|h| h.start <= index && index < h.end && h.current <= index)
            .map(|h| target - self.boundaries[h.current.min(self.boundaries.len() - 1)])
            .fold(f64::INFINITY, f64::min)
    }

    /// Path to a ready segment, waiting for the scheduler when necessary.
    pub async fn get_segment(self: &Arc<Self>, index: usize) -> Result<PathBuf, SegmentError> {
        if index >= self.segments.len() {
            return Err(SegmentError::Other(format!("segment {index} out of range")));
        }
        if self.is_ready(index) {
            self.prefetch(index);
            return Ok(self.segment_path(index));
        }
        if self.errored.load(Ordering::Relaxed) {
            // A previous head died; restart from here.
            self.errored.store(false, Ordering::Relaxed);
            self.clone().run(index);
        } else {
            let distance = self.min_head_distance(index);
            if distance.is_infinite() || distance > MAX_ENCODER_DISTANCE {
                self.clone().run(index);
            }
        }

        let mut ready_rx = self.segments[index].tx.subscribe();
        let mut kill_rx = self.kill_tx.subscribe();
        let wait = async {
            loop {
                if *ready_rx.borrow() {
                    return Ok(());
                }
                tokio::select! {
                    changed = ready_rx.changed() => {
                        if changed.is_err() {
                            return Err(SegmentError::Other("stream dropped".into()));
                        }
                    }
                    _ = kill_rx.changed() => {
                        if self.errored.load(Ordering::Relaxed) {
                            return Err(SegmentError::Errored("ffmpeg exited abnormally".into()));
                        }
                        return Err(SegmentError::Other("stream killed".into()));
                    }
                }
            }
        };
        match tokio::time::timeout(SEGMENT_WAIT_TIMEOUT, wait).await {
            Ok(Ok(())) => {
                self.prefetch(index);
                Ok(self.segment_path(index))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::error!(
                    segment = index,
                    kind = ?self.kind,
                    "Could not retrieve segment (timeout)"
                );
                Err(SegmentError::Timeout)
            }
        }
    }

    /// Schedule upcoming segments so playback does not stall at the next
    /// request. Audio heads are cheap and not prefetched.
    fn prefetch(self: &Arc<Self>, index: usize) {
        if matches!(self.kind, StreamKind::Audio(_)) {
            return;
        }
        let limit = (index + PREFETCH_WINDOW).min(self.segments.len().saturating_sub(1));
        for i in index + 1..=limit {
            if self.is_ready(i) {
                continue;
            }
            let distance = self.min_head_distance(i);
            if distance < MAX_ENCODER_DISTANCE + 5.0 * (i - index) as f64 {
                continue;
            }
            tracing::trace!(segment = i, "Starting encoder head for upcoming segment");
            self.clone().run(i);
            return;
        }
    }

    /// Stop every head and wake waiters.
    pub fn kill(&self) {
        self.kill_tx.send_replace(true);
        self.heads.lock().clear();
    }

    /// Start an encoder head at `start`, transcoding forward until it hits
    /// a segment another head already produced or the per-head budget.
    fn run(self: Arc<Self>, start: usize) {
        let len = self.segments.len();
        let mut end = (start + SEGMENTS_PER_HEAD).min(len);
        // Stop at the first segment another head is currently producing or
        // that already exists.
        for i in start..end {
            if self.is_ready(i) || self.is_head_at(i) {
                end = i;
                break;
            }
        }
        if start >= end {
            return;
        }

        {
            let mut heads = self.heads.lock();
            heads.push(Head {
                start,
                current: start,
                end,
            });
        }
        tracing::debug!(start = start, end = end, kind = ?self.kind, "Scheduling encoder head");

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.clone().run_head(start, end).await {
                tracing::error!(start = start, error = %e, "Encoder head failed");
                this.errored.store(true, Ordering::Relaxed);
                // Wake waiters so they observe the error state.
                this.kill_tx.send_replace(true);
                this.kill_tx.send_replace(false);
            }
            this.heads
                .lock()
                .retain(|h| !(h.start == start && h.end == end));
        });
    }

    fn is_head_at(&self, index: usize) -> bool {
        self.heads.lock().iter().any(|h| h.current == index)
    }

    async fn run_head(self: Arc<Self>, start: usize, end: usize) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await.ok();

        // Seek one segment early: audio needs context before the cut, and
        // for video -ss resolves to the keyframe at or before the target,
        // so aiming at the midpoint of the previous segment lands exactly
        // on its keyframe. The pre-roll segment is numbered start-1 and
        // discarded by the list parser.
        let seek_segment = start.saturating_sub(1);
        let base = self.boundaries[seek_segment];
        let start_ref = if start == 0 {
            0.0
        } else {
            match self.kind {
                StreamKind::Audio(_) => base,
                StreamKind::Video(_) => (base + self.boundaries[start]) / 2.0,
            }
        };

        // Split points relative to the seek keyframe. With a pre-roll the
        // first cut separates it from the requested segment.
        let first_split = if start == 0 { 1 } else { start };
        let split_times: Vec<String> = (first_split..end)
            .map(|i| format!("{:.6}", self.boundaries[i] - base))
            .collect();
        let split_arg = if split_times.is_empty() {
            format!("{:.6}", (self.duration - base).max(0.1))
        } else {
            split_times.join(",")
        };
        // x264 keyframe placement wants absolute (copyts) timestamps.
        let keyframe_arg: String = (first_split..end)
            .map(|i| format!("{:.6}", self.boundaries[i]))
            .collect::<Vec<_>>()
            .join(",");

        let mut args: Vec<String> = vec![
            "-nostats".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
        ];
        if start_ref > 0.0 {
            if matches!(self.kind, StreamKind::Video(_)) {
                args.push("-noaccurate_seek".into());
            }
            args.push("-ss".into());
            args.push(format!("{start_ref:.6}"));
        }
        if end < self.segments.len() {
            // -to is confused by the keyframe snap of -ss; give back the
            // time lost between the requested and the actual seek point.
            let end_ref = self.boundaries[end] + (start_ref - base);
            args.push("-to".into());
            args.push(format!("{end_ref:.6}"));
        }
        args.push("-i".into());
        args.push(self.input.to_string_lossy().to_string());
        args.push("-start_at_zero".into());
        args.push("-copyts".into());
        args.push("-muxdelay".into());
        args.push("0".into());
        args.extend(self.codec_args(&keyframe_arg));
        args.extend([
            "-f".into(),
            "segment".into(),
            "-segment_time_delta".into(),
            "0.05".into(),
            "-segment_format".into(),
            "mpegts".into(),
            "-segment_times".into(),
            split_arg,
            "-segment_list_type".into(),
            "flat".into(),
            "-segment_list".into(),
            "pipe:1".into(),
            "-segment_start_number".into(),
            seek_segment.to_string(),
            self.out_dir
                .join("segment-%d.ts")
                .to_string_lossy()
                .to_string(),
        ]);

        tracing::debug!(
            kind = ?self.kind,
            start = start,
            end = end,
            "Starting ffmpeg head"
        );
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        let stdout = child.stdout.take().context("No ffmpeg stdout")?;
        let mut stdin = child.stdin.take().context("No ffmpeg stdin")?;
        let mut lines = BufReader::new(stdout).lines();
        let mut kill_rx = self.kill_tx.subscribe();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.unwrap_or(None) else { break };
                    let Some(index) = parse_segment_index(&line) else { continue };
                    if index < start {
                        // Pre-roll segment produced by the seek padding.
                        continue;
                    }
                    {
                        let mut heads = self.heads.lock();
                        if let Some(head) = heads
                            .iter_mut()
                            .find(|h| h.start == start && h.end == end)
                        {
                            head.current = index + 1;
                        }
                    }
                    let ready_next = {
                        if let Some(segment) = self.segments.get(index) {
                            segment.tx.send_replace(true);
                        }
                        index + 1 >= end
                            || self.is_ready(index + 1)
                    };
                    if ready_next {
                        // Next segment exists already; ask ffmpeg to quit.
                        let _ = stdin.write_all(b"q").await;
                        let _ = stdin.shutdown().await;
                        break;
                    }
                }
                _ = kill_rx.changed() => {
                    let _ = stdin.write_all(b"q").await;
                    let _ = stdin.shutdown().await;
                    break;
                }
            }
        }

        let status = child.wait().await.context("ffmpeg wait failed")?;
        // 255 is ffmpeg's exit code for a requested quit.
        if !status.success() && status.code() != Some(255) {
            anyhow::bail!("ffmpeg exited with {status}");
        }
        Ok(())
    }

    fn codec_args(&self, split_times: &str) -> Vec<String> {
        match self.kind {
            StreamKind::Video(VideoQuality::Original) => vec![
                "-map".into(),
                "0:V:0".into(),
                "-c:v".into(),
                "copy".into(),
                "-an".into(),
            ],
            StreamKind::Video(quality) => vec![
                "-map".into(),
                "0:V:0".into(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "veryfast".into(),
                "-crf".into(),
                "23".into(),
                "-vf".into(),
                format!("scale=-2:{}", quality.height()),
                "-force_key_frames".into(),
                split_times.to_string(),
                "-an".into(),
            ],
            StreamKind::Audio(index) => vec![
                "-map".into(),
                format!("0:a:{index}"),
                "-c:a".into(),
                "aac".into(),
                "-ac".into(),
                "2".into(),
                "-b:a".into(),
                "192k".into(),
                "-vn".into(),
            ],
        }
    }

    /// Mark a segment ready out-of-band (tests and disk rehydration).
    #[cfg(test)]
    pub fn mark_ready(&self, index: usize) {
        if let Some(segment) = self.segments.get(index) {
            segment.tx.send_replace(true);
        }
    }
}

/// `-segment_list` lines are segment file names, e.g. `segment-12.ts`.
fn parse_segment_index(line: &str) -> Option<usize> {
    let name = line.trim().rsplit('/').next()?;
    let rest = name.strip_prefix("segment-")?;
    let digits = rest.strip_suffix(".ts")?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(kind: StreamKind) -> Arc<TranscodeStream> {
        let boundaries: Vec<f64> = (0..10).map(|i| i as f64 * 8.0).collect();
        Arc::new(TranscodeStream::new(
            kind,
            PathBuf::from("/tmp/in.mkv"),
            PathBuf::from("/tmp/out"),
            Arc::new(boundaries),
            80.0,
            "ffmpeg".to_string(),
        ))
    }

    #[test]
    fn test_parse_segment_index() {
        assert_eq!(parse_segment_index("segment-12.ts"), Some(12));
        assert_eq!(parse_segment_index("/a/b/segment-0.ts"), Some(0));
        assert_eq!(parse_segment_index("noise"), None);
    }

    #[tokio::test]
    async fn test_ready_segment_returns_immediately() {
        let s = stream(StreamKind::Audio(0));
        s.mark_ready(3);
        let path = s.get_segment(3).await.unwrap();
        assert!(path.to_string_lossy().ends_with("segment-3.ts"));
    }

    #[tokio::test]
    async fn test_out_of_range_segment() {
        let s = stream(StreamKind::Audio(0));
        assert!(matches!(
            s.get_segment(99).await,
            Err(SegmentError::Other(_))
        ));
    }

    #[test]
    fn test_codec_args_scaled() {
        let s = stream(StreamKind::Video(VideoQuality::P720));
        let args = s.codec_args("8.0,16.0");
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"scale=-2:720".to_string()));
    }

    #[test]
    fn test_codec_args_original_copies() {
        let s = stream(StreamKind::Video(VideoQuality::Original));
        let args = s.codec_args("");
        assert!(args.contains(&"copy".to_string()));
    }
}
