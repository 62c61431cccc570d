//! YOLOv8 object detection through ONNX Runtime.

use anyhow::{Context, Result};
use common::detections::BoundingBox;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{session::Session, value::Value};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::DetectorSettings;
use crate::onnx::{self, ExecutionProvider};

/// One class-labelled box from a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Produces class-labelled boxes for a decoded frame
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &RgbImage) -> Result<Vec<RawDetection>>;

    fn health_check(&self) -> bool {
        true
    }
}

/// YOLOv8 COCO detector; expects an `output0` tensor shaped `[1, 4 + classes, predictions]`
pub struct YoloV8Detector {
    settings: DetectorSettings,
    session: Mutex<Session>,
    provider: ExecutionProvider,
    max_detections: usize,
}

impl YoloV8Detector {
    pub fn load(settings: &DetectorSettings) -> Result<Self> {
        let (session, provider) = onnx::load_session(&settings.model_path, settings)?;

        tracing::info!(
            model = %settings.model_path.display(),
            provider = %provider,
            confidence = settings.confidence_threshold,
            input_size = settings.input_size,
            "initialized YOLOv8 detector"
        );

        Ok(Self {
            settings: settings.clone(),
            session: Mutex::new(session),
            provider,
            max_detections: 300,
        })
    }

    /// Resize to the square model input and convert to normalized NCHW
    fn preprocess(&self, frame: &RgbImage) -> Array<f32, IxDyn> {
        let size = self.settings.input_size;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }
        input
    }

    fn postprocess(&self, output: &Array<f32, IxDyn>, width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            anyhow::bail!("unexpected detector output shape {:?}", shape);
        }

        let num_predictions = shape[2];
        let num_classes = shape[1] - 4;
        let scale_x = width as f32 / self.settings.input_size as f32;
        let scale_y = height as f32 / self.settings.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..num_predictions {
            let (class_idx, score) = (0..num_classes)
                .map(|c| (c, output[[0, 4 + c, i]]))
                .fold((0, f32::MIN), |best, current| if current.1 > best.1 { current } else { best });

            if score < self.settings.confidence_threshold {
                continue;
            }

            let (cx, cy) = (output[[0, 0, i]], output[[0, 1, i]]);
            let (w, h) = (output[[0, 2, i]], output[[0, 3, i]]);

            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).clamp(0.0, width as f32),
                ((cy - h / 2.0) * scale_y).clamp(0.0, height as f32),
                ((cx + w / 2.0) * scale_x).clamp(0.0, width as f32),
                ((cy + h / 2.0) * scale_y).clamp(0.0, height as f32),
            );

            candidates.push(RawDetection {
                class_id: class_idx as u32,
                confidence: score,
                bbox,
            });
        }

        let mut kept = non_max_suppression(candidates, self.settings.iou_threshold);
        kept.truncate(self.max_detections);
        Ok(kept)
    }
}

impl ObjectDetector for YoloV8Detector {
    fn name(&self) -> &str {
        "yolov8"
    }

    fn detect(&self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = Value::from_array(self.preprocess(frame))?;

        let inference_start = Instant::now();
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock session: {}", e))?;
        let outputs = session.run(ort::inputs![input])?;
        let inference_time = inference_start.elapsed();

        let output_value = outputs.get("output0").context("No output tensor found")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;
        let shape: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape), data.to_vec())?;

        telemetry::metrics::PEOPLE_INFERENCE_TIME
            .with_label_values(&[self.name(), self.provider.label()])
            .observe(inference_time.as_secs_f64());

        self.postprocess(&output, frame.width(), frame.height())
    }
}

/// Per-class greedy NMS; output is sorted by confidence, highest first
pub fn non_max_suppression(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, x: f32, y: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(x, y, x + 50.0, y + 50.0),
        }
    }

    #[test]
    fn test_nms_suppresses_overlaps_within_class() {
        let boxes = vec![det(0, 0.8, 15.0, 15.0), det(0, 0.9, 10.0, 10.0), det(0, 0.85, 200.0, 200.0)];

        let filtered = non_max_suppression(boxes, 0.45);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].confidence, 0.9);
        assert_eq!(filtered[1].confidence, 0.85);
    }

    #[test]
    fn test_nms_keeps_overlapping_boxes_of_different_classes() {
        // A handbag inside a person box must survive
        let boxes = vec![det(0, 0.9, 10.0, 10.0), det(26, 0.7, 12.0, 12.0)];

        let filtered = non_max_suppression(boxes, 0.45);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), 0.45).is_empty());
    }
}
