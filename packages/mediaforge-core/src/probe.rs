//! Metadata probe: shells out to `ffprobe` and projects its JSON output into
//! the flat `Metadata` record the rest of the system consumes.
//!
//! A failed or malformed probe never fails the job - it degrades to a
//! size-only record, since metadata is advisory output, not a job input.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Flat, wire-serializable projection of whatever `ffprobe` reported.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metadata {
    #[serde(rename = "format")]
    pub container: Option<String>,
    #[serde(rename = "duration")]
    pub duration_secs: Option<f64>,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(rename = "bitrate")]
    pub bitrate_bps: Option<u64>,
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    #[serde(default)]
    streams: Vec<FFprobeStream>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_name: Option<String>,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Probes `path` with `ffprobe_binary`, falling back to a size-only record on
/// any failure (spawn failure, non-JSON output, non-zero exit).
pub async fn probe(ffprobe_binary: &str, path: &Path) -> Metadata {
    let size_bytes = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    match run_ffprobe(ffprobe_binary, path).await {
        Some(output) => project(output, size_bytes),
        None => Metadata {
            size_bytes,
            ..Default::default()
        },
    }
}

async fn run_ffprobe(ffprobe_binary: &str, path: &Path) -> Option<FFprobeOutput> {
    let output = Command::new(ffprobe_binary)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    serde_json::from_slice(&output.stdout).ok()
}

fn project(parsed: FFprobeOutput, size_bytes: u64) -> Metadata {
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let (duration_secs, container, bitrate_bps) = match parsed.format {
        Some(f) => (
            f.duration.and_then(|d| d.parse::<f64>().ok()),
            f.format_name,
            f.bit_rate.and_then(|b| b.parse::<u64>().ok()),
        ),
        None => (None, None, None),
    };

    Metadata {
        container,
        duration_secs,
        size_bytes,
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
        bitrate_bps,
        fps: video_stream.and_then(|s| parse_frame_rate(s.avg_frame_rate.as_deref()?)),
    }
}

/// `avg_frame_rate` arrives as a fraction like `"30000/1001"` or `"0/0"` when
/// unknown.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_frame_rate() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
    }

    #[test]
    fn rejects_zero_denominator_frame_rate() {
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn projects_video_and_audio_streams_independently() {
        let parsed = FFprobeOutput {
            streams: vec![
                FFprobeStream {
                    codec_name: Some("h264".into()),
                    codec_type: Some("video".into()),
                    width: Some(1920),
                    height: Some(1080),
                    avg_frame_rate: Some("30/1".into()),
                },
                FFprobeStream {
                    codec_name: Some("aac".into()),
                    codec_type: Some("audio".into()),
                    width: None,
                    height: None,
                    avg_frame_rate: None,
                },
            ],
            format: Some(FFprobeFormat {
                format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".into()),
                duration: Some("12.5".into()),
                bit_rate: Some("500000".into()),
            }),
        };
        let metadata = project(parsed, 1024);
        assert_eq!(metadata.video_codec.as_deref(), Some("h264"));
        assert_eq!(metadata.audio_codec.as_deref(), Some("aac"));
        assert_eq!(metadata.width, Some(1920));
        assert_eq!(metadata.duration_secs, Some(12.5));
        assert_eq!(metadata.size_bytes, 1024);
        assert_eq!(metadata.fps, Some(30.0));
    }

    #[test]
    fn missing_format_block_still_projects_size() {
        let parsed = FFprobeOutput {
            streams: vec![],
            format: None,
        };
        let metadata = project(parsed, 42);
        assert_eq!(metadata.size_bytes, 42);
        assert!(metadata.duration_secs.is_none());
    }
}
