//! The blocking per-video run: decode, detect, track, annotate, encode, report.

use anyhow::{Context, Result};
use chrono::Utc;
use common::report::{RunSummary, VideoMetadata};
use common::zones::ZonePolygons;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use crate::analyzer::{analyze_person, AttributeAnalyzer};
use crate::metadata::{RecordingAnchor, Timeline};
use crate::render::Annotator;
use crate::report::{write_report, ReportBuilder};
use crate::source::DetectionSource;
use crate::tracking::{PersonTracker, ZoneEvent};
use crate::video::MediaBackend;

/// Inputs for one run; all paths are decided by the caller
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source_video: PathBuf,
    pub processed_video: PathBuf,
    pub report_path: PathBuf,
    pub zones: ZonePolygons,
    /// `None` when the container probe failed
    pub video_metadata: Option<VideoMetadata>,
    pub anchor: RecordingAnchor,
}

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub processed_video: PathBuf,
    pub report_path: PathBuf,
    pub frames: u64,
    pub summary: RunSummary,
}

/// Collaborators borrowed for the duration of a run
pub struct RunContext<'a> {
    pub media: &'a dyn MediaBackend,
    pub source: &'a mut dyn DetectionSource,
    pub analyzer: &'a dyn AttributeAnalyzer,
    pub annotator: &'a Annotator,
}

/// Process a whole video. Must run on a blocking thread.
pub fn run_video(request: RunRequest, ctx: RunContext<'_>) -> Result<RunArtifacts> {
    let RunContext {
        media,
        source,
        analyzer,
        annotator,
    } = ctx;

    let stream = media
        .probe_stream(&request.source_video)
        .context("failed to read video stream information")?;
    let timeline = Timeline::new(request.anchor.instant(), stream.fps)?;

    info!(
        source = %request.source_video.display(),
        width = stream.width,
        height = stream.height,
        fps = stream.fps,
        anchor = %timeline.anchor(),
        "starting video run"
    );

    let mut reader = media.open_reader(&request.source_video, &stream)?;
    let mut writer = media.open_writer(&request.processed_video, &stream)?;

    let mut tracker = PersonTracker::new(request.zones, timeline);
    let mut report = ReportBuilder::new();
    let mut frame_index: u64 = 0;

    while let Some(mut frame) = reader.next_frame()? {
        let frame_start = Instant::now();

        let detections = source
            .detect(frame_index, &frame)
            .with_context(|| format!("detection failed on frame {}", frame_index))?;

        let update = tracker.observe(frame_index, &detections, |bbox| {
            analyze_person(analyzer, &frame, bbox)
        })?;
        record_events(&update.events);

        annotator.draw(&mut frame, &update.records, tracker.zones(), tracker.counters());
        writer
            .write_frame(&frame)
            .with_context(|| format!("failed to encode frame {}", frame_index))?;

        report.push_frame(frame_index, timeline.stamp(frame_index), update.records);

        telemetry::metrics::PEOPLE_FRAMES_PROCESSED.inc();
        telemetry::metrics::PEOPLE_FRAME_LATENCY.observe(frame_start.elapsed().as_secs_f64());
        frame_index += 1;
    }

    record_events(&tracker.finalize());
    writer.finish().context("failed to finalize processed video")?;

    let total_frames = frame_index;
    let people_report = report.finish(&tracker, request.video_metadata, total_frames, Utc::now());
    write_report(&request.report_path, &people_report)?;

    info!(
        frames = total_frames,
        total = people_report.summary.total_people,
        restricted = people_report.summary.restricted_area_entries,
        report = %request.report_path.display(),
        "video run complete"
    );

    Ok(RunArtifacts {
        processed_video: request.processed_video,
        report_path: request.report_path,
        frames: total_frames,
        summary: people_report.summary,
    })
}

fn record_events(events: &[ZoneEvent]) {
    for event in events {
        telemetry::metrics::PEOPLE_ZONE_EVENTS
            .with_label_values(&[event.kind()])
            .inc();
        debug!(?event, "zone event");
    }
}
