//! ONNX Runtime session construction shared by the detector and the attribute model.

use anyhow::Result;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::config::DetectorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
    TensorRt,
}

impl ExecutionProvider {
    /// Unknown names select the CPU
    pub fn parse(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "TENSORRT" => ExecutionProvider::TensorRt,
            "CUDA" => ExecutionProvider::Cuda,
            _ => ExecutionProvider::Cpu,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "CPU",
            ExecutionProvider::Cuda => "CUDA",
            ExecutionProvider::TensorRt => "TensorRT",
        }
    }

    /// Providers to attempt, most preferred first. The CPU is always last.
    fn fallback_chain(self) -> &'static [ExecutionProvider] {
        match self {
            ExecutionProvider::TensorRt => &[
                ExecutionProvider::TensorRt,
                ExecutionProvider::Cuda,
                ExecutionProvider::Cpu,
            ],
            ExecutionProvider::Cuda => &[ExecutionProvider::Cuda, ExecutionProvider::Cpu],
            ExecutionProvider::Cpu => &[ExecutionProvider::Cpu],
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Load a model, falling back along TensorRT -> CUDA -> CPU until one provider succeeds.
pub fn load_session(
    model_path: &Path,
    settings: &DetectorSettings,
) -> Result<(Session, ExecutionProvider)> {
    let preferred = ExecutionProvider::parse(&settings.execution_provider);
    let mut last_error = None;

    for &provider in preferred.fallback_chain() {
        match build_session(model_path, settings, provider) {
            Ok(session) => {
                info!(
                    model = %model_path.display(),
                    provider = %provider,
                    device_id = settings.device_id,
                    "model session ready"
                );
                return Ok((session, provider));
            }
            Err(e) => {
                warn!(
                    model = %model_path.display(),
                    provider = %provider,
                    error = %e,
                    "execution provider unavailable, falling back"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("no execution provider configured"))
        .context(format!("failed to load model {}", model_path.display())))
}

fn build_session(
    model_path: &Path,
    settings: &DetectorSettings,
    provider: ExecutionProvider,
) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(settings.intra_threads)?;

    let builder = match provider {
        ExecutionProvider::TensorRt => builder.with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(settings.device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(settings.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?,
        ExecutionProvider::Cuda => builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(settings.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?,
        ExecutionProvider::Cpu => builder,
    };

    Ok(builder.commit_from_file(model_path)?)
}
