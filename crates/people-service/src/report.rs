//! Report assembly and persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use common::report::{FrameRecord, PeopleReport, PersonDetection, RunSummary, VideoMetadata};
use serde::Serialize;
use std::path::Path;

use crate::tracking::PersonTracker;

/// Accumulates per-frame records for one run
#[derive(Debug, Default)]
pub struct ReportBuilder {
    frames: Vec<FrameRecord>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, frame_number: u64, timestamp: String, detections: Vec<PersonDetection>) {
        self.frames.push(FrameRecord {
            frame_number,
            timestamp,
            detections,
        });
    }

    /// Build the final report. The tracker should already be finalized so exits are counted.
    pub fn finish(
        self,
        tracker: &PersonTracker,
        video_metadata: Option<VideoMetadata>,
        total_frames: u64,
        processed_at: DateTime<Utc>,
    ) -> PeopleReport {
        PeopleReport {
            video_metadata,
            processing_time: processed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            summary: build_summary(tracker, total_frames),
            frame_detections: self.frames,
        }
    }
}

pub fn build_summary(tracker: &PersonTracker, total_frames: u64) -> RunSummary {
    let counters = tracker.counters();
    let fps = tracker.timeline().fps();

    RunSummary {
        total_people: counters.total,
        total_entering: counters.entering,
        total_exiting: counters.exiting,
        restricted_area_entries: counters.restricted,
        restricted_people_ids: tracker.restricted_ids(),
        fps,
        duration_seconds: total_frames as f64 / fps,
    }
}

/// `{video_name}_{YYYY-mm-dd_HH-MM-SS}.json`, stamped with local time
pub fn report_file_name(video_name: &str, now: DateTime<Local>) -> String {
    format!("{}_{}.json", video_name, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Write the report as pretty JSON with four-space indentation
pub fn write_report(path: &Path, report: &PeopleReport) -> Result<()> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    report
        .serialize(&mut serializer)
        .context("failed to serialize report")?;

    std::fs::write(path, buffer)
        .with_context(|| format!("failed to write report {}", path.display()))
}
