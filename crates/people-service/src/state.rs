use crate::analyzer::{AttributeAnalyzer, DisabledAnalyzer, GenderAgeAnalyzer};
use crate::config::PeopleServiceConfig;
use crate::detector::YoloV8Detector;
use crate::error::ApiError;
use crate::forwarder::{HttpForwarder, ReportForwarder};
use crate::metadata::RecordingAnchor;
use crate::pipeline::{run_video, RunContext, RunRequest};
use crate::render::Annotator;
use crate::report::report_file_name;
use crate::source::{DetectionSourceFactory, TrackedDetectorFactory};
use crate::video::{FfmpegBackend, MediaBackend};
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use common::report::UploadResponse;
use common::validation::file_stem;
use common::zones::ZonePolygons;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded and processed successfully";

/// Swappable collaborators of the service
#[derive(Clone)]
pub struct ServiceComponents {
    pub media: Arc<dyn MediaBackend>,
    pub sources: Arc<dyn DetectionSourceFactory>,
    pub analyzer: Arc<dyn AttributeAnalyzer>,
    pub forwarder: Arc<dyn ReportForwarder>,
    pub annotator: Annotator,
}

/// Name of the per-run directory under both the upload and results directories
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// A stored upload waiting to be processed
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub run_id: String,
    /// Sanitized client file name
    pub file_name: String,
    pub source_video: PathBuf,
    pub zones: ZonePolygons,
}

#[derive(Clone)]
pub struct PeopleServiceState {
    inner: Arc<PeopleServiceStateInner>,
}

struct PeopleServiceStateInner {
    config: PeopleServiceConfig,
    components: ServiceComponents,
}

impl PeopleServiceState {
    pub fn new(config: PeopleServiceConfig, components: ServiceComponents) -> Self {
        Self {
            inner: Arc::new(PeopleServiceStateInner { config, components }),
        }
    }

    /// Load models, font and HTTP client described by `config`
    pub fn from_config(config: PeopleServiceConfig) -> Result<Self> {
        let detector = YoloV8Detector::load(&config.detector).context("failed to load detector")?;

        let analyzer: Arc<dyn AttributeAnalyzer> = match &config.attribute_model_path {
            Some(path) => Arc::new(
                GenderAgeAnalyzer::load(path, &config.detector)
                    .context("failed to load attribute model")?,
            ),
            None => {
                warn!("ATTRIBUTE_MODEL_PATH not set, gender and age will be reported as Unknown");
                Arc::new(DisabledAnalyzer)
            }
        };

        let annotator = match &config.label_font_path {
            Some(path) => Annotator::with_font_file(path)?,
            None => {
                info!("LABEL_FONT_PATH not set, rendering boxes and zones without text");
                Annotator::default()
            }
        };

        let forwarder = HttpForwarder::new(config.second_backend_url.clone(), config.forward_timeout)?;

        let components = ServiceComponents {
            media: Arc::new(FfmpegBackend),
            sources: Arc::new(TrackedDetectorFactory::new(Arc::new(detector))),
            analyzer,
            forwarder: Arc::new(forwarder),
            annotator,
        };

        Ok(Self::new(config, components))
    }

    pub fn config(&self) -> &PeopleServiceConfig {
        &self.inner.config
    }

    /// Health of each model-backed component, keyed by name
    pub fn readiness(&self) -> BTreeMap<String, bool> {
        let components = &self.inner.components;
        let mut health = BTreeMap::new();
        health.insert(
            format!("detector:{}", components.sources.name()),
            components.sources.health_check(),
        );
        health.insert(
            format!("analyzer:{}", components.analyzer.name()),
            components.analyzer.health_check(),
        );
        health
    }

    /// Run the full pipeline for a stored upload and forward the report
    pub async fn process_upload(&self, job: UploadJob) -> Result<UploadResponse, ApiError> {
        let started = Instant::now();
        telemetry::metrics::PEOPLE_ACTIVE_RUNS.inc();

        let result = self.run(job).await;

        telemetry::metrics::PEOPLE_ACTIVE_RUNS.dec();
        telemetry::metrics::PEOPLE_RUN_DURATION.observe(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(ApiError::Forward(_)) => "forward_error",
            Err(_) => "pipeline_error",
        };
        telemetry::metrics::PEOPLE_RUNS
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn run(&self, job: UploadJob) -> Result<UploadResponse, ApiError> {
        let config = &self.inner.config;
        let components = &self.inner.components;

        let video_metadata = match components
            .media
            .probe_metadata(&job.source_video, config.probe_timeout)
            .await
        {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(source = %job.source_video.display(), error = %format!("{:#}", e), "metadata probe failed");
                None
            }
        };

        let anchor = RecordingAnchor::resolve(video_metadata.as_ref(), Utc::now());
        if let RecordingAnchor::Fallback { at, reason } = &anchor {
            warn!(anchor = %at, reason = %reason, "using processing time as recording start");
        }

        // One directory per run keeps concurrent same-name uploads apart
        let run_dir = config.results_dir.join(&job.run_id);
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| ApiError::internal(format!("failed to create run directory: {}", e)))?;

        let processed_video = run_dir.join(format!("processed_{}", job.file_name));
        let report_path = run_dir.join(report_file_name(&file_stem(&job.file_name), Local::now()));

        let request = RunRequest {
            source_video: job.source_video.clone(),
            processed_video,
            report_path,
            zones: job.zones,
            video_metadata,
            anchor,
        };

        let components = components.clone();
        let artifacts = tokio::task::spawn_blocking(move || {
            let mut source = components.sources.create()?;
            run_video(
                request,
                RunContext {
                    media: components.media.as_ref(),
                    source: source.as_mut(),
                    analyzer: components.analyzer.as_ref(),
                    annotator: &components.annotator,
                },
            )
        })
        .await
        .map_err(|e| ApiError::internal(format!("video worker failed: {}", e)))?
        .map_err(|e| {
            error!(source = %job.source_video.display(), error = %format!("{:#}", e), "video run failed");
            ApiError::from(e)
        })?;

        let second_backend_response = self
            .inner
            .components
            .forwarder
            .forward(&artifacts.report_path)
            .await?;

        Ok(UploadResponse {
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
            source_video: job.source_video.display().to_string(),
            processed_video: artifacts.processed_video.display().to_string(),
            json_output: artifacts.report_path.display().to_string(),
            second_backend_response,
        })
    }
}
