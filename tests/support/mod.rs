//! Scripted collaborators for driving the people service without models or ffmpeg.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{extract::Multipart, routing::post, Json, Router};
use common::detections::BoundingBox;
use common::report::{Age, VideoMetadata};
use image::RgbImage;
use people_service::analyzer::{AttributeAnalyzer, Demographics};
use people_service::config::PeopleServiceConfig;
use people_service::forwarder::HttpForwarder;
use people_service::render::Annotator;
use people_service::source::{
    DetectionSource, DetectionSourceFactory, FrameDetections, PersonObservation,
};
use people_service::state::{PeopleServiceState, ServiceComponents};
use people_service::video::{FrameSink, FrameSource, MediaBackend, StreamInfo};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;
pub const FPS: f64 = 10.0;

/// Recording start written into the fake container
pub const CREATION_TIME: &str = "2024-05-01T08:30:00.000000Z";

/// Media backend producing blank frames and recording what gets encoded
pub struct FakeMedia {
    pub frames: u64,
    pub metadata: Option<VideoMetadata>,
    pub written: Arc<AtomicUsize>,
}

impl FakeMedia {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            metadata: Some(VideoMetadata {
                creation_time: Some(CREATION_TIME.to_string()),
                fps: Some(FPS),
                width: Some(WIDTH),
                height: Some(HEIGHT),
                ..Default::default()
            }),
            written: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulate an unreadable container header
    pub fn without_metadata(mut self) -> Self {
        self.metadata = None;
        self
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn probe_metadata(&self, _path: &Path, _timeout: Duration) -> Result<VideoMetadata> {
        self.metadata
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ffprobe failed: invalid data found"))
    }

    fn probe_stream(&self, _path: &Path) -> Result<StreamInfo> {
        Ok(StreamInfo {
            width: WIDTH,
            height: HEIGHT,
            fps: FPS,
        })
    }

    fn open_reader(&self, _path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(BlankFrames {
            remaining: self.frames,
            info: *info,
        }))
    }

    fn open_writer(&self, path: &Path, _info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(CountingSink {
            path: path.to_path_buf(),
            written: self.written.clone(),
            local: 0,
        }))
    }
}

struct BlankFrames {
    remaining: u64,
    info: StreamInfo,
}

impl FrameSource for BlankFrames {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(RgbImage::new(self.info.width, self.info.height)))
    }
}

struct CountingSink {
    path: PathBuf,
    written: Arc<AtomicUsize>,
    local: usize,
}

impl FrameSink for CountingSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        self.local += 1;
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        std::fs::write(&self.path, format!("{} frames", self.local))?;
        Ok(())
    }
}

type Script = dyn Fn(u64) -> FrameDetections + Send + Sync;

/// Detection source that replays a per-frame script
pub struct ScriptedSources {
    script: Arc<Script>,
}

impl ScriptedSources {
    pub fn new(script: impl Fn(u64) -> FrameDetections + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
        }
    }
}

impl DetectionSourceFactory for ScriptedSources {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create(&self) -> Result<Box<dyn DetectionSource>> {
        Ok(Box::new(ScriptedSource {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedSource {
    script: Arc<Script>,
}

impl DetectionSource for ScriptedSource {
    fn detect(&mut self, frame_index: u64, _frame: &RgbImage) -> Result<FrameDetections> {
        Ok((self.script)(frame_index))
    }
}

/// Source factory whose detector is broken
pub struct BrokenSources;

impl DetectionSourceFactory for BrokenSources {
    fn name(&self) -> &str {
        "broken"
    }

    fn create(&self) -> Result<Box<dyn DetectionSource>> {
        anyhow::bail!("model file is corrupt")
    }

    fn health_check(&self) -> bool {
        false
    }
}

pub struct FixedAnalyzer;

impl AttributeAnalyzer for FixedAnalyzer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn analyze(&self, _crop: &RgbImage) -> Result<Demographics> {
        Ok(Demographics {
            gender: "Woman".to_string(),
            age: Age::Years(29),
        })
    }
}

/// Analyzer that fails every call and counts how often it was asked
#[derive(Default)]
pub struct FailingAnalyzer {
    pub calls: AtomicUsize,
}

impl AttributeAnalyzer for FailingAnalyzer {
    fn name(&self) -> &str {
        "failing"
    }

    fn analyze(&self, _crop: &RgbImage) -> Result<Demographics> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("face model unavailable")
    }
}

/// A person whose bottom-center lands on (x, y)
pub fn person_at(tracker_id: u64, x: f32, y: f32) -> PersonObservation {
    PersonObservation {
        tracker_id,
        bbox: BoundingBox::new(x - 15.0, y - 80.0, x + 15.0, y),
        confidence: 0.88,
    }
}

pub fn people(observations: Vec<PersonObservation>) -> FrameDetections {
    FrameDetections {
        people: observations,
        objects: Vec::new(),
    }
}

/// How the fake downstream service answers
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum DownstreamReply {
    Json,
    PlainText,
}

/// Start a downstream service; returns its upload URL and the received file names
pub async fn spawn_downstream(reply: DownstreamReply) -> (Url, Arc<Mutex<Vec<String>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    let app = Router::new().route(
        "/upload_2_people",
        post(move |mut multipart: Multipart| {
            let log = log.clone();
            async move {
                let mut file_name = String::new();
                while let Ok(Some(field)) = multipart.next_field().await {
                    if field.name() == Some("json_file") {
                        file_name = field.file_name().unwrap_or_default().to_string();
                        let body = field.bytes().await.unwrap_or_default();
                        assert!(serde_json::from_slice::<serde_json::Value>(&body).is_ok());
                    }
                }
                log.lock().unwrap().push(file_name.clone());

                match reply {
                    DownstreamReply::Json => axum::response::IntoResponse::into_response(Json(
                        serde_json::json!({"status": "stored", "file": file_name}),
                    )),
                    DownstreamReply::PlainText => {
                        axum::response::IntoResponse::into_response("stored, thanks")
                    }
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = Url::parse(&format!("http://{}/upload_2_people", addr)).unwrap();
    (url, received)
}

/// A service wired to scripted collaborators, rooted in a temp directory
pub struct Harness {
    pub state: PeopleServiceState,
    pub dir: tempfile::TempDir,
    pub written: Arc<AtomicUsize>,
}

impl Harness {
    pub async fn new(
        media: FakeMedia,
        sources: Arc<dyn DetectionSourceFactory>,
        analyzer: Arc<dyn AttributeAnalyzer>,
        downstream: Url,
    ) -> Self {
        telemetry::init();

        let dir = tempfile::tempdir().unwrap();
        let config = PeopleServiceConfig::for_directories(
            dir.path().join("uploads"),
            dir.path().join("results"),
            downstream.clone(),
        );
        config.ensure_directories().await.unwrap();

        let written = media.written.clone();
        let forwarder = HttpForwarder::new(downstream, Duration::from_secs(5)).unwrap();
        let components = ServiceComponents {
            media: Arc::new(media),
            sources,
            analyzer,
            forwarder: Arc::new(forwarder),
            annotator: Annotator::default(),
        };

        Self {
            state: PeopleServiceState::new(config, components),
            dir,
            written,
        }
    }

    pub fn uploads(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn results(&self) -> PathBuf {
        self.dir.path().join("results")
    }
}

/// Every file below `dir` (recursively) with the given extension
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(files_with_extension(&path, extension));
        } else if path.extension().is_some_and(|ext| ext == extension) {
            found.push(path);
        }
    }
    found.sort();
    found
}
