//! Container metadata extraction and the recording-time anchor.
//!
//! The anchor is the wall-clock instant of frame 0. Every timestamp in the report is derived
//! from it as `anchor + frame / fps`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use common::report::VideoMetadata;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::tracking::TrackingError;

/// Format used for every per-frame, entry and exit timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CREATION_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Run ffprobe against a local file and extract the report metadata.
///
/// Errors when ffprobe cannot run, exits non-zero, times out or prints unparseable output.
pub async fn probe_metadata(path: &Path, probe_timeout: Duration) -> Result<VideoMetadata> {
    debug!(path = %path.display(), "probing container metadata");

    let output = timeout(
        probe_timeout,
        Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("ffprobe timed out after {}s", probe_timeout.as_secs()))?
    .context("failed to execute ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ffprobe failed ({}): {}", output.status, stderr.trim());
    }

    let data: Value =
        serde_json::from_slice(&output.stdout).context("failed to parse ffprobe output")?;

    Ok(parse_probe_output(&data))
}

/// Map ffprobe's `-show_format -show_streams` JSON onto the report metadata.
pub fn parse_probe_output(data: &Value) -> VideoMetadata {
    let mut metadata = VideoMetadata::default();

    let format = &data["format"];
    if format.is_object() {
        metadata.filename = string_field(&format["filename"]);
        metadata.format_name = string_field(&format["format_name"]);
        metadata.format_long_name = string_field(&format["format_long_name"]);
        metadata.duration_seconds = number_field(&format["duration"]);
        metadata.size_bytes = number_field(&format["size"]);
        metadata.bitrate = number_field(&format["bit_rate"]);

        let tags = &format["tags"];
        metadata.creation_time = string_field(&tags["creation_time"]);
        metadata.encoder = string_field(&tags["encoder"]);
        metadata.gps_coordinates = string_field(&tags["location"])
            .or_else(|| string_field(&tags["com.apple.quicktime.location.ISO6709"]));
    }

    let streams = data["streams"].as_array().map(Vec::as_slice).unwrap_or_default();

    if let Some(video) = first_stream(streams, "video") {
        metadata.video_codec = string_field(&video["codec_name"]);
        metadata.width = number_field(&video["width"]);
        metadata.height = number_field(&video["height"]);
        metadata.fps = video["avg_frame_rate"].as_str().and_then(parse_frame_rate);

        let tags = &video["tags"];
        metadata.device_model = string_field(&tags["com.apple.quicktime.model"]);
        metadata.software = string_field(&tags["software"]);
    }

    if let Some(audio) = first_stream(streams, "audio") {
        metadata.audio_codec = string_field(&audio["codec_name"]);
        metadata.sample_rate = number_field(&audio["sample_rate"]);
        metadata.channels = number_field(&audio["channels"]);
    }

    if let Some(raw) = metadata.creation_time.as_deref() {
        match parse_creation_time(raw) {
            Ok(created) => {
                let local = created.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z");
                metadata.creation_time_utc =
                    Some(created.format("%Y-%m-%d %H:%M:%S UTC").to_string());
                metadata.creation_time_local = Some(local.to_string());
                metadata.recording_time = metadata.creation_time_local.clone();
            }
            Err(e) => {
                warn!(creation_time = %raw, error = %e, "unparseable creation_time tag");
            }
        }
    }

    metadata
}

/// Parse an ffprobe rate such as `30000/1001`. Zero or missing denominators yield `None`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };

    if den == 0.0 {
        return None;
    }

    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Parse a container creation time. Fractional seconds and a trailing zone designator are
/// dropped and the remainder is read as UTC.
pub fn parse_creation_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let trimmed = raw.trim();
    let whole_seconds = trimmed.split('.').next().unwrap_or(trimmed);
    let without_zone = whole_seconds.trim_end_matches('Z');

    NaiveDateTime::parse_from_str(without_zone, CREATION_TIME_FORMAT).map(|naive| naive.and_utc())
}

/// Where the wall-clock time of frame 0 came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingAnchor {
    /// Parsed from the container's creation_time tag
    Container(DateTime<Utc>),
    /// Processing time, used when the container did not provide one
    Fallback { at: DateTime<Utc>, reason: String },
}

impl RecordingAnchor {
    /// Choose the anchor for a run. `metadata` is `None` when the probe failed.
    pub fn resolve(metadata: Option<&VideoMetadata>, now: DateTime<Utc>) -> Self {
        let Some(metadata) = metadata else {
            return RecordingAnchor::Fallback {
                at: now,
                reason: "metadata probe failed".to_string(),
            };
        };

        match metadata.creation_time.as_deref() {
            Some(raw) if !raw.trim().is_empty() => match parse_creation_time(raw) {
                Ok(at) => RecordingAnchor::Container(at),
                Err(e) => RecordingAnchor::Fallback {
                    at: now,
                    reason: format!("malformed creation_time {:?}: {}", raw, e),
                },
            },
            _ => RecordingAnchor::Fallback {
                at: now,
                reason: "no creation_time tag".to_string(),
            },
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            RecordingAnchor::Container(at) | RecordingAnchor::Fallback { at, .. } => *at,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RecordingAnchor::Fallback { .. })
    }
}

/// Maps frame indices to wall-clock instants for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    anchor: DateTime<Utc>,
    fps: f64,
}

impl Timeline {
    pub fn new(anchor: DateTime<Utc>, fps: f64) -> Result<Self, TrackingError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(TrackingError::InvalidFrameRate(fps));
        }
        Ok(Self { anchor, fps })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    /// Instant of a frame, rounded to the microsecond
    pub fn at(&self, frame: u64) -> DateTime<Utc> {
        let micros = (frame as f64 / self.fps * 1_000_000.0).round() as i64;
        self.anchor + chrono::Duration::microseconds(micros)
    }

    /// Formatted instant of a frame
    pub fn stamp(&self, frame: u64) -> String {
        self.at(frame).format(TIMESTAMP_FORMAT).to_string()
    }
}

fn first_stream<'a>(streams: &'a [Value], codec_type: &str) -> Option<&'a Value> {
    streams
        .iter()
        .find(|stream| stream["codec_type"].as_str() == Some(codec_type))
}

fn string_field(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// ffprobe prints most numbers as strings; accept either form
fn number_field<T: std::str::FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
