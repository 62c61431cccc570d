//! Per-frame detections with stable person identities.

use anyhow::Result;
use common::detections::{BoundingBox, CarryableKind, PERSON_CLASS};
use image::RgbImage;
use std::sync::Arc;

use crate::detector::ObjectDetector;
use crate::tracker::IouTracker;

/// A tracked person in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonObservation {
    pub tracker_id: u64,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// A carryable object (bag, cat, dog) in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectObservation {
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    pub people: Vec<PersonObservation>,
    pub objects: Vec<ObjectObservation>,
}

/// Turns decoded frames into tracked detections. One instance serves one run.
pub trait DetectionSource: Send {
    fn detect(&mut self, frame_index: u64, frame: &RgbImage) -> Result<FrameDetections>;
}

/// Creates a fresh source for each run so tracker ids never leak between videos
pub trait DetectionSourceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn DetectionSource>>;

    fn health_check(&self) -> bool {
        true
    }
}

/// Detector plus IoU tracker. Classes other than people and carryables are dropped.
pub struct TrackedDetector {
    detector: Arc<dyn ObjectDetector>,
    tracker: IouTracker,
}

impl TrackedDetector {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self {
            detector,
            tracker: IouTracker::default(),
        }
    }
}

impl DetectionSource for TrackedDetector {
    fn detect(&mut self, _frame_index: u64, frame: &RgbImage) -> Result<FrameDetections> {
        let raw = self.detector.detect(frame)?;

        let mut person_boxes = Vec::new();
        let mut objects = Vec::new();
        for detection in raw {
            if detection.class_id == PERSON_CLASS {
                person_boxes.push((detection.bbox, detection.confidence));
            } else if CarryableKind::from_class_id(detection.class_id).is_some() {
                objects.push(ObjectObservation {
                    class_id: detection.class_id,
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                });
            }
        }

        let people = self
            .tracker
            .update(&person_boxes)
            .into_iter()
            .map(|tracked| PersonObservation {
                tracker_id: tracked.tracker_id,
                bbox: tracked.bbox,
                confidence: tracked.confidence,
            })
            .collect();

        Ok(FrameDetections { people, objects })
    }
}

/// Shares one loaded detector across runs, each with its own tracker
pub struct TrackedDetectorFactory {
    detector: Arc<dyn ObjectDetector>,
}

impl TrackedDetectorFactory {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self { detector }
    }
}

impl DetectionSourceFactory for TrackedDetectorFactory {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn create(&self) -> Result<Box<dyn DetectionSource>> {
        Ok(Box::new(TrackedDetector::new(self.detector.clone())))
    }

    fn health_check(&self) -> bool {
        self.detector.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::RawDetection;

    struct FixedDetector(Vec<RawDetection>);

    impl ObjectDetector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_splits_people_and_carryables() {
        let detector = FixedDetector(vec![
            RawDetection {
                class_id: 0,
                confidence: 0.9,
                bbox: BoundingBox::new(10.0, 10.0, 110.0, 310.0),
            },
            RawDetection {
                class_id: 26,
                confidence: 0.6,
                bbox: BoundingBox::new(40.0, 200.0, 80.0, 260.0),
            },
            // car, ignored
            RawDetection {
                class_id: 2,
                confidence: 0.8,
                bbox: BoundingBox::new(300.0, 10.0, 500.0, 200.0),
            },
        ]);

        let mut source = TrackedDetector::new(Arc::new(detector));
        let frame = RgbImage::new(640, 480);

        let first = source.detect(0, &frame).unwrap();
        assert_eq!(first.people.len(), 1);
        assert_eq!(first.people[0].tracker_id, 1);
        assert_eq!(first.objects.len(), 1);
        assert_eq!(first.objects[0].class_id, 26);

        let second = source.detect(1, &frame).unwrap();
        assert_eq!(second.people[0].tracker_id, 1);
    }

    #[test]
    fn test_factory_sources_have_independent_ids() {
        let detector = FixedDetector(vec![RawDetection {
            class_id: 0,
            confidence: 0.9,
            bbox: BoundingBox::new(10.0, 10.0, 110.0, 310.0),
        }]);
        let factory = TrackedDetectorFactory::new(Arc::new(detector));
        let frame = RgbImage::new(640, 480);

        let mut first_run = factory.create().unwrap();
        first_run.detect(0, &frame).unwrap();

        // A second video starts numbering from 1 again
        let mut second_run = factory.create().unwrap();
        let detections = second_run.detect(0, &frame).unwrap();
        assert_eq!(detections.people[0].tracker_id, 1);
        assert_eq!(factory.name(), "fixed");
    }
}
