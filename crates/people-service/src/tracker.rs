//! Greedy IoU tracker assigning stable ids to person boxes across frames.

use common::detections::BoundingBox;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
struct Track {
    bbox: BoundingBox,
    missing: u32,
}

/// A detection with the track id it was assigned this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBox {
    pub tracker_id: u64,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug)]
pub struct IouTracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    iou_threshold: f32,
    max_missing: u32,
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(0.3, 30)
    }
}

impl IouTracker {
    /// `max_missing` is how many consecutive frames a track survives without a match
    pub fn new(iou_threshold: f32, max_missing: u32) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            iou_threshold,
            max_missing,
        }
    }

    /// Match this frame's boxes to live tracks. Output order follows `detections`.
    pub fn update(&mut self, detections: &[(BoundingBox, f32)]) -> Vec<TrackedBox> {
        let mut pairs: Vec<(f32, u64, usize)> = Vec::new();
        for (&track_id, track) in &self.tracks {
            for (det_idx, (bbox, _)) in detections.iter().enumerate() {
                let iou = track.bbox.iou(bbox);
                if iou >= self.iou_threshold {
                    pairs.push((iou, track_id, det_idx));
                }
            }
        }

        // Highest overlap first; ties resolve to the older track
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let mut matched_tracks: HashSet<u64> = HashSet::new();
        let mut assignment: Vec<Option<u64>> = vec![None; detections.len()];
        for (_, track_id, det_idx) in pairs {
            if matched_tracks.contains(&track_id) || assignment[det_idx].is_some() {
                continue;
            }
            matched_tracks.insert(track_id);
            assignment[det_idx] = Some(track_id);
        }

        for (track_id, track) in self.tracks.iter_mut() {
            if !matched_tracks.contains(track_id) {
                track.missing += 1;
            }
        }
        let max_missing = self.max_missing;
        self.tracks.retain(|_, track| track.missing <= max_missing);

        detections
            .iter()
            .zip(assignment)
            .map(|(&(bbox, confidence), assigned)| {
                let tracker_id = match assigned {
                    Some(id) => id,
                    None => {
                        let id = self.next_id;
                        self.next_id += 1;
                        id
                    }
                };
                self.tracks.insert(tracker_id, Track { bbox, missing: 0 });
                TrackedBox {
                    tracker_id,
                    bbox,
                    confidence,
                }
            })
            .collect()
    }
}
