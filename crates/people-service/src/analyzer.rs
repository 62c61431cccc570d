//! Age and gender estimation for a person crop.
//!
//! Failures never abort a run: any error becomes [`AttributeOutcome::Degraded`] and the report
//! shows "Unknown" for both attributes.

use anyhow::{Context, Result};
use common::detections::BoundingBox;
use common::report::{Age, UNKNOWN};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{session::Session, value::Value};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

use crate::config::DetectorSettings;
use crate::onnx::{self, ExecutionProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demographics {
    pub gender: String,
    pub age: Age,
}

impl Demographics {
    pub fn unknown() -> Self {
        Self {
            gender: UNKNOWN.to_string(),
            age: Age::Unknown,
        }
    }
}

/// Result of one attribute analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOutcome {
    Measured(Demographics),
    Degraded { reason: String },
}

impl AttributeOutcome {
    /// Values to record; degraded outcomes yield "Unknown"/"Unknown"
    pub fn into_demographics(self) -> Demographics {
        match self {
            AttributeOutcome::Measured(demographics) => demographics,
            AttributeOutcome::Degraded { .. } => Demographics::unknown(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AttributeOutcome::Degraded { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            AttributeOutcome::Measured(_) => "measured",
            AttributeOutcome::Degraded { .. } => "degraded",
        }
    }
}

pub trait AttributeAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, crop: &RgbImage) -> Result<Demographics>;

    fn health_check(&self) -> bool {
        true
    }
}

/// Crop `bbox` out of `frame` and analyze it. Never fails.
pub fn analyze_person(
    analyzer: &dyn AttributeAnalyzer,
    frame: &RgbImage,
    bbox: &BoundingBox,
) -> AttributeOutcome {
    let outcome = match crop_region(frame, bbox) {
        Some(crop) => match analyzer.analyze(&crop) {
            Ok(demographics) => AttributeOutcome::Measured(demographics),
            Err(e) => AttributeOutcome::Degraded {
                reason: format!("{:#}", e),
            },
        },
        None => AttributeOutcome::Degraded {
            reason: "empty person crop".to_string(),
        },
    };

    if let AttributeOutcome::Degraded { reason } = &outcome {
        warn!(analyzer = analyzer.name(), reason = %reason, "attribute analysis degraded");
    }

    telemetry::metrics::PEOPLE_ATTRIBUTE_OUTCOMES
        .with_label_values(&[outcome.label()])
        .inc();

    outcome
}

/// Integer crop of `bbox` clipped to the frame; `None` when nothing is left
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(frame.width());
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(frame.height());

    let (x1, y1) = (clamp_x(bbox.x1), clamp_y(bbox.y1));
    let (x2, y2) = (clamp_x(bbox.x2), clamp_y(bbox.y2));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Used when no attribute model is configured; every analysis degrades
#[derive(Debug, Default)]
pub struct DisabledAnalyzer;

impl AttributeAnalyzer for DisabledAnalyzer {
    fn name(&self) -> &str {
        "disabled"
    }

    fn analyze(&self, _crop: &RgbImage) -> Result<Demographics> {
        anyhow::bail!("no attribute model configured")
    }
}

const GENDERAGE_INPUT_SIZE: u32 = 96;
const GENDERAGE_OUTPUT: &str = "fc1";

/// InsightFace `genderage.onnx`: 96x96 RGB in [0, 255], output `[female, male, age / 100]`
pub struct GenderAgeAnalyzer {
    session: Mutex<Session>,
    provider: ExecutionProvider,
}

impl GenderAgeAnalyzer {
    pub fn load(model_path: &Path, settings: &DetectorSettings) -> Result<Self> {
        let (session, provider) = onnx::load_session(model_path, settings)?;
        Ok(Self {
            session: Mutex::new(session),
            provider,
        })
    }

    fn preprocess(crop: &RgbImage) -> Array<f32, IxDyn> {
        let size = GENDERAGE_INPUT_SIZE;
        let resized = image::imageops::resize(crop, size, size, FilterType::Triangle);

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                input[[0, channel, y, x]] = f32::from(pixel[channel]);
            }
        }
        input
    }
}

/// Decode the three genderage scores
pub fn decode_genderage(scores: &[f32]) -> Result<Demographics> {
    let [female, male, age] = scores else {
        anyhow::bail!("expected 3 genderage scores, got {}", scores.len());
    };

    let gender = if male > female { "Man" } else { "Woman" };
    let years = (age * 100.0).round();
    if !years.is_finite() || years < 0.0 {
        anyhow::bail!("age estimate out of range: {}", years);
    }

    Ok(Demographics {
        gender: gender.to_string(),
        age: Age::Years(years as u32),
    })
}

impl AttributeAnalyzer for GenderAgeAnalyzer {
    fn name(&self) -> &str {
        "genderage"
    }

    fn analyze(&self, crop: &RgbImage) -> Result<Demographics> {
        let input = Value::from_array(Self::preprocess(crop))?;

        let start = Instant::now();
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock session: {}", e))?;
        let outputs = session.run(ort::inputs![input])?;

        let output = outputs
            .get(GENDERAGE_OUTPUT)
            .context("No genderage output tensor found")?;
        let (_, scores) = output.try_extract_tensor::<f32>()?;
        let demographics = decode_genderage(scores)?;

        telemetry::metrics::PEOPLE_INFERENCE_TIME
            .with_label_values(&[self.name(), self.provider.label()])
            .observe(start.elapsed().as_secs_f64());

        Ok(demographics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAnalyzer;

    impl AttributeAnalyzer for FixedAnalyzer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn analyze(&self, crop: &RgbImage) -> Result<Demographics> {
            Ok(Demographics {
                gender: "Woman".to_string(),
                age: Age::Years(crop.width()),
            })
        }
    }

    #[test]
    fn test_decode_genderage() {
        let demographics = decode_genderage(&[0.2, 0.8, 0.347]).unwrap();
        assert_eq!(demographics.gender, "Man");
        assert_eq!(demographics.age, Age::Years(35));

        let demographics = decode_genderage(&[0.9, 0.1, 0.21]).unwrap();
        assert_eq!(demographics.gender, "Woman");

        assert!(decode_genderage(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_crop_is_clipped_to_frame() {
        let frame = RgbImage::new(100, 80);

        let crop = crop_region(&frame, &BoundingBox::new(-10.0, 20.0, 50.0, 200.0)).unwrap();
        assert_eq!((crop.width(), crop.height()), (50, 60));

        assert!(crop_region(&frame, &BoundingBox::new(120.0, 10.0, 150.0, 40.0)).is_none());
        assert!(crop_region(&frame, &BoundingBox::new(30.0, 30.0, 30.0, 60.0)).is_none());
    }

    #[test]
    fn test_analyze_person_outcomes() {
        let frame = RgbImage::new(100, 100);
        let bbox = BoundingBox::new(10.0, 10.0, 40.0, 90.0);

        let outcome = analyze_person(&FixedAnalyzer, &frame, &bbox);
        assert_eq!(
            outcome,
            AttributeOutcome::Measured(Demographics {
                gender: "Woman".to_string(),
                age: Age::Years(30),
            })
        );

        let outcome = analyze_person(&DisabledAnalyzer, &frame, &bbox);
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_demographics(), Demographics::unknown());
    }

    #[test]
    fn test_empty_crop_degrades_without_calling_model() {
        let frame = RgbImage::new(100, 100);
        let outcome = analyze_person(&FixedAnalyzer, &frame, &BoundingBox::new(200.0, 0.0, 300.0, 50.0));
        assert!(outcome.is_degraded());
    }
}
