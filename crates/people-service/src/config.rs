use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8011";
const DEFAULT_SECOND_BACKEND_URL: &str = "http://localhost:8013/upload_2_people";

#[derive(Debug, Clone)]
pub struct PeopleServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Where uploaded source videos are stored
    pub upload_dir: PathBuf,

    /// Where reports and rendered videos are written
    pub results_dir: PathBuf,

    /// Downstream endpoint receiving the JSON report
    pub second_backend_url: Url,

    /// Bound on the downstream call
    pub forward_timeout: Duration,

    /// Bound on the container metadata probe
    pub probe_timeout: Duration,

    /// Largest accepted multipart body
    pub max_upload_bytes: usize,

    pub detector: DetectorSettings,

    /// Gender/age model; `None` disables attribute analysis
    pub attribute_model_path: Option<PathBuf>,

    /// Font for box labels and counters; `None` draws geometry only
    pub label_font_path: Option<PathBuf>,
}

/// Settings shared by the ONNX-backed models
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    /// CPU, CUDA or TensorRT
    pub execution_provider: String,
    pub device_id: i32,
    pub intra_threads: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8x.onnx"),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            execution_provider: "CPU".to_string(),
            device_id: 0,
            intra_threads: 4,
        }
    }
}

impl PeopleServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("PEOPLE_SERVICE_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
        let results_dir = env::var("RESULTS_DIR").unwrap_or_else(|_| "results".to_string());

        let second_backend_url = env::var("SECOND_BACKEND_URL")
            .unwrap_or_else(|_| DEFAULT_SECOND_BACKEND_URL.to_string());
        let second_backend_url =
            Url::parse(&second_backend_url).context("Invalid SECOND_BACKEND_URL")?;

        let forward_timeout = Duration::from_secs(parse_var("FORWARD_TIMEOUT_SECS", 10)?);
        let probe_timeout = Duration::from_secs(parse_var("PROBE_TIMEOUT_SECS", 15)?);
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", 2 * 1024 * 1024 * 1024)?;

        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            model_path: env::var("DETECTOR_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            confidence_threshold: parse_var(
                "DETECTOR_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            iou_threshold: parse_var("DETECTOR_IOU_THRESHOLD", defaults.iou_threshold)?,
            input_size: parse_var("DETECTOR_INPUT_SIZE", defaults.input_size)?,
            execution_provider: env::var("EXECUTION_PROVIDER")
                .unwrap_or(defaults.execution_provider),
            device_id: parse_var("DEVICE_ID", defaults.device_id)?,
            intra_threads: parse_var("INTRA_THREADS", defaults.intra_threads)?,
        };

        if !(0.0..=1.0).contains(&detector.confidence_threshold) {
            bail!("DETECTOR_CONFIDENCE_THRESHOLD must be between 0 and 1");
        }

        Ok(Self {
            bind_addr,
            upload_dir: PathBuf::from(upload_dir),
            results_dir: PathBuf::from(results_dir),
            second_backend_url,
            forward_timeout,
            probe_timeout,
            max_upload_bytes,
            detector,
            attribute_model_path: optional_path("ATTRIBUTE_MODEL_PATH"),
            label_font_path: optional_path("LABEL_FONT_PATH"),
        })
    }

    /// Configuration rooted in a scratch directory, used by tests and local runs
    pub fn for_directories(upload_dir: PathBuf, results_dir: PathBuf, second_backend_url: Url) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            upload_dir,
            results_dir,
            second_backend_url,
            forward_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(15),
            max_upload_bytes: 64 * 1024 * 1024,
            detector: DetectorSettings::default(),
            attribute_model_path: None,
            label_font_path: None,
        }
    }

    /// Create the upload and results directories if missing
    pub async fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.results_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.input_size, 640);
        assert_eq!(settings.execution_provider, "CPU");
        assert!(settings.model_path.ends_with("yolov8x.onnx"));
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let value: u64 = parse_var("PEOPLE_SERVICE_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_ensure_directories_creates_both() {
        let dir = tempfile::tempdir().unwrap();
        let config = PeopleServiceConfig::for_directories(
            dir.path().join("up"),
            dir.path().join("out"),
            Url::parse("http://localhost:8013/upload_2_people").unwrap(),
        );

        config.ensure_directories().await.unwrap();

        assert!(dir.path().join("up").is_dir());
        assert!(dir.path().join("out").is_dir());
    }
}
