//! Report contracts for the people flow service.
//!
//! These types define the persisted JSON report and the upload endpoint response. The
//! downstream service reads the report verbatim, so field names are part of the contract.

use serde::{Deserialize, Serialize};

/// Label used when an attribute could not be determined
pub const UNKNOWN: &str = "Unknown";

/// Carrying sentinel: assessed at entry, nothing carried
pub const NO_OBJECTS: &str = "no objects";

/// Carrying sentinel: not assessed yet
pub const NOT_ASSESSED: &str = "none";

/// Estimated age, serialized as a number or as "Unknown"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AgeRepr", into = "AgeRepr")]
pub enum Age {
    #[default]
    Unknown,
    Years(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AgeRepr {
    Years(u32),
    Label(String),
}

impl From<AgeRepr> for Age {
    fn from(repr: AgeRepr) -> Self {
        match repr {
            AgeRepr::Years(years) => Age::Years(years),
            AgeRepr::Label(_) => Age::Unknown,
        }
    }
}

impl From<Age> for AgeRepr {
    fn from(age: Age) -> Self {
        match age {
            Age::Years(years) => AgeRepr::Years(years),
            Age::Unknown => AgeRepr::Label(UNKNOWN.to_string()),
        }
    }
}

impl std::fmt::Display for Age {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Age::Years(years) => write!(f, "{}", years),
            Age::Unknown => f.write_str(UNKNOWN),
        }
    }
}

/// Items a person was carrying at zone entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CarryingRepr", into = "CarryingRepr")]
pub enum Carrying {
    /// Entry has not happened yet ("none")
    #[default]
    NotAssessed,
    /// Assessed at entry, nothing found ("no objects")
    Nothing,
    /// Item labels in detection order, e.g. `["bag", "dog"]`
    Items(Vec<String>),
}

impl Carrying {
    pub fn from_items(items: Vec<String>) -> Self {
        if items.is_empty() {
            Carrying::Nothing
        } else {
            Carrying::Items(items)
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CarryingRepr {
    Items(Vec<String>),
    Label(String),
}

impl From<CarryingRepr> for Carrying {
    fn from(repr: CarryingRepr) -> Self {
        match repr {
            CarryingRepr::Items(items) => Carrying::from_items(items),
            CarryingRepr::Label(label) if label == NO_OBJECTS => Carrying::Nothing,
            CarryingRepr::Label(_) => Carrying::NotAssessed,
        }
    }
}

impl From<Carrying> for CarryingRepr {
    fn from(carrying: Carrying) -> Self {
        match carrying {
            Carrying::NotAssessed => CarryingRepr::Label(NOT_ASSESSED.to_string()),
            Carrying::Nothing => CarryingRepr::Label(NO_OBJECTS.to_string()),
            Carrying::Items(items) => CarryingRepr::Items(items),
        }
    }
}

/// One tracked person in one frame. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDetection {
    pub tracker_id: u64,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
    /// Inside the entry polygon
    pub in_area1: bool,
    /// Inside the exit polygon
    pub in_area2: bool,
    pub in_restricted_area: bool,
    pub gender: String,
    pub age: Age,
    pub carrying: Carrying,
    pub entry_time: Option<String>,
    pub exit_time: Option<String>,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub entered_restricted: bool,
}

/// All people observed in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_number: u64,
    pub timestamp: String,
    pub detections: Vec<PersonDetection>,
}

/// Aggregate counters for a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_people: u64,
    pub total_entering: u64,
    pub total_exiting: u64,
    pub restricted_area_entries: u64,
    /// Sorted ascending
    pub restricted_people_ids: Vec<u64>,
    pub fps: f64,
    /// Frame count divided by frame rate, independent of wall-clock time
    pub duration_seconds: f64,
}

/// Container metadata as reported by ffprobe. Every field is best effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_coordinates: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time_local: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_time: Option<String>,
}

/// The persisted report for one processed video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeopleReport {
    /// `None` when the container could not be probed
    pub video_metadata: Option<VideoMetadata>,
    pub processing_time: String,
    pub summary: RunSummary,
    pub frame_detections: Vec<FrameRecord>,
}

/// Successful response of the upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub source_video: String,
    pub processed_video: String,
    pub json_output: String,
    /// Downstream response body, passed through untouched
    pub second_backend_response: serde_json::Value,
}
