//! Delivery of the JSON report to the downstream service.

use async_trait::async_trait;
use reqwest::{multipart, Url};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Multipart field carrying the report file
pub const REPORT_PART: &str = "json_file";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to read report {path}: {source}")]
    ReadReport {
        path: String,
        source: std::io::Error,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("response is not valid JSON: {0}")]
    InvalidResponse(String),
}

impl ForwardError {
    fn label(&self) -> &'static str {
        match self {
            ForwardError::ReadReport { .. } => "read_error",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Transport(_) => "transport_error",
            ForwardError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[async_trait]
pub trait ReportForwarder: Send + Sync {
    /// Upload the report and return the downstream JSON response
    async fn forward(&self, report_path: &Path) -> Result<Value, ForwardError>;
}

pub struct HttpForwarder {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    async fn send(&self, report_path: &Path) -> Result<Value, ForwardError> {
        let bytes = tokio::fs::read(report_path)
            .await
            .map_err(|source| ForwardError::ReadReport {
                path: report_path.display().to_string(),
                source,
            })?;

        let file_name = report_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.json".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/json")
            .map_err(|e| ForwardError::Transport(e.to_string()))?;
        let form = multipart::Form::new().part(REPORT_PART, part);

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = %status, "downstream returned non-success status");
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&body).map_err(|e| ForwardError::InvalidResponse(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> ForwardError {
        if err.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else {
            ForwardError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl ReportForwarder for HttpForwarder {
    async fn forward(&self, report_path: &Path) -> Result<Value, ForwardError> {
        let start = Instant::now();
        let result = self.send(report_path).await;

        telemetry::metrics::PEOPLE_FORWARD_LATENCY.observe(start.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        telemetry::metrics::PEOPLE_FORWARD_REQUESTS
            .with_label_values(&[status])
            .inc();

        match &result {
            Ok(_) => info!(url = %self.url, report = %report_path.display(), "report forwarded"),
            Err(e) => warn!(url = %self.url, error = %e, "report forwarding failed"),
        }

        result
    }
}
