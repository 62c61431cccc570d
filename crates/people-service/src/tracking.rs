//! Zone-crossing state machine.
//!
//! One [`TrackHistory`] per tracker id lives for the whole run. A person "enters" the first
//! time their reference point lands in the entry or exit polygon; that is the only moment
//! attributes and carried items are captured. Exits are assigned once, after the last frame,
//! from the last frame the person was seen.

use common::detections::{BoundingBox, PERSON_CLASS};
use common::report::{Age, Carrying, PersonDetection, UNKNOWN};
use common::zones::ZonePolygons;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::analyzer::AttributeOutcome;
use crate::carry::carried_items;
use crate::metadata::Timeline;
use crate::source::FrameDetections;

#[derive(Debug, Error, PartialEq)]
pub enum TrackingError {
    #[error("frame {got} is not after frame {last}")]
    OutOfOrderFrame { last: u64, got: u64 },

    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),

    #[error("tracker already finalized")]
    Finalized,
}

/// Everything known about one tracker id
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHistory {
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub entered_restricted: bool,
    pub entry_frame: Option<u64>,
    pub entry_time: Option<String>,
    pub exit_frame: Option<u64>,
    pub exit_time: Option<String>,
    pub gender: String,
    pub age: Age,
    pub carrying: Carrying,
}

impl TrackHistory {
    fn first_seen(frame: u64) -> Self {
        Self {
            first_seen_frame: frame,
            last_seen_frame: frame,
            entered_restricted: false,
            entry_frame: None,
            entry_time: None,
            exit_frame: None,
            exit_time: None,
            gender: UNKNOWN.to_string(),
            age: Age::Unknown,
            carrying: Carrying::NotAssessed,
        }
    }

    pub fn has_entered(&self) -> bool {
        self.entry_frame.is_some()
    }
}

/// A state transition, reported to the caller for logging and metrics
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    Entered {
        tracker_id: u64,
        frame: u64,
        attributes_degraded: bool,
    },
    RestrictedEntered {
        tracker_id: u64,
        frame: u64,
    },
    Exited {
        tracker_id: u64,
        frame: u64,
    },
}

impl ZoneEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ZoneEvent::Entered { .. } => "entry",
            ZoneEvent::RestrictedEntered { .. } => "restricted",
            ZoneEvent::Exited { .. } => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total: u64,
    pub entering: u64,
    pub exiting: u64,
    pub restricted: u64,
}

/// Output of one observed frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameUpdate {
    /// One record per person, in detection order, reflecting state after this frame
    pub records: Vec<PersonDetection>,
    pub events: Vec<ZoneEvent>,
}

#[derive(Debug)]
pub struct PersonTracker {
    zones: ZonePolygons,
    timeline: Timeline,
    histories: BTreeMap<u64, TrackHistory>,
    restricted_ids: BTreeSet<u64>,
    counters: Counters,
    last_frame: Option<u64>,
    finalized: bool,
}

impl PersonTracker {
    pub fn new(zones: ZonePolygons, timeline: Timeline) -> Self {
        Self {
            zones,
            timeline,
            histories: BTreeMap::new(),
            restricted_ids: BTreeSet::new(),
            counters: Counters::default(),
            last_frame: None,
            finalized: false,
        }
    }

    pub fn zones(&self) -> &ZonePolygons {
        &self.zones
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Restricted tracker ids, ascending
    pub fn restricted_ids(&self) -> Vec<u64> {
        self.restricted_ids.iter().copied().collect()
    }

    pub fn history(&self, tracker_id: u64) -> Option<&TrackHistory> {
        self.histories.get(&tracker_id)
    }

    pub fn histories(&self) -> impl Iterator<Item = (&u64, &TrackHistory)> {
        self.histories.iter()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Apply one frame of detections.
    ///
    /// `analyze` is called at most once per tracker over the whole run, on the frame the
    /// tracker enters. Frame indices must be strictly increasing.
    pub fn observe<F>(
        &mut self,
        frame: u64,
        detections: &FrameDetections,
        mut analyze: F,
    ) -> Result<FrameUpdate, TrackingError>
    where
        F: FnMut(&BoundingBox) -> AttributeOutcome,
    {
        if self.finalized {
            return Err(TrackingError::Finalized);
        }
        if let Some(last) = self.last_frame {
            if frame <= last {
                return Err(TrackingError::OutOfOrderFrame { last, got: frame });
            }
        }
        self.last_frame = Some(frame);

        let mut update = FrameUpdate::default();

        for person in &detections.people {
            let hits = self.zones.classify(person.bbox.reference_point());

            let history = self
                .histories
                .entry(person.tracker_id)
                .and_modify(|history| history.last_seen_frame = frame)
                .or_insert_with(|| TrackHistory::first_seen(frame));

            if hits.restricted && !history.entered_restricted {
                history.entered_restricted = true;
                self.counters.restricted += 1;
                self.restricted_ids.insert(person.tracker_id);
                update.events.push(ZoneEvent::RestrictedEntered {
                    tracker_id: person.tracker_id,
                    frame,
                });
            }

            if hits.in_doorway() && history.entry_frame.is_none() {
                let outcome = analyze(&person.bbox);
                let attributes_degraded = outcome.is_degraded();
                let demographics = outcome.into_demographics();

                history.entry_frame = Some(frame);
                history.entry_time = Some(self.timeline.stamp(frame));
                history.gender = demographics.gender;
                history.age = demographics.age;
                history.carrying = carried_items(&person.bbox, &detections.objects);

                self.counters.entering += 1;
                self.counters.total += 1;
                update.events.push(ZoneEvent::Entered {
                    tracker_id: person.tracker_id,
                    frame,
                    attributes_degraded,
                });
            }

            update.records.push(PersonDetection {
                tracker_id: person.tracker_id,
                class_id: PERSON_CLASS,
                class_name: "person".to_string(),
                confidence: person.confidence,
                bbox: person.bbox.to_array(),
                in_area1: hits.entry,
                in_area2: hits.exit,
                in_restricted_area: hits.restricted,
                gender: history.gender.clone(),
                age: history.age,
                carrying: history.carrying.clone(),
                entry_time: history.entry_time.clone(),
                exit_time: history.exit_time.clone(),
                first_seen_frame: history.first_seen_frame,
                last_seen_frame: history.last_seen_frame,
                entered_restricted: history.entered_restricted,
            });
        }

        Ok(update)
    }

    /// Close out every entered person without an exit. Later calls return no events.
    pub fn finalize(&mut self) -> Vec<ZoneEvent> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;

        let mut events = Vec::new();
        for (&tracker_id, history) in self.histories.iter_mut() {
            if history.entry_frame.is_some() && history.exit_frame.is_none() {
                let frame = history.last_seen_frame;
                history.exit_frame = Some(frame);
                history.exit_time = Some(self.timeline.stamp(frame));
                self.counters.exiting += 1;
                events.push(ZoneEvent::Exited { tracker_id, frame });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Demographics;
    use crate::source::{ObjectObservation, PersonObservation};
    use chrono::{TimeZone, Utc};
    use common::zones::Polygon;

    fn square(x1: i32, y1: i32, x2: i32, y2: i32) -> Polygon {
        Polygon::from(vec![[x1, y1], [x2, y1], [x2, y2], [x1, y2]])
    }

    fn timeline() -> Timeline {
        Timeline::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(), 10.0).unwrap()
    }

    /// Person box whose bottom-center lands on (x, y)
    fn person_at(tracker_id: u64, x: f32, y: f32) -> PersonObservation {
        PersonObservation {
            tracker_id,
            bbox: BoundingBox::new(x - 20.0, y - 100.0, x + 20.0, y),
            confidence: 0.9,
        }
    }

    fn frame_of(people: Vec<PersonObservation>) -> FrameDetections {
        FrameDetections {
            people,
            objects: Vec::new(),
        }
    }

    fn measured(_: &BoundingBox) -> AttributeOutcome {
        AttributeOutcome::Measured(Demographics {
            gender: "Man".to_string(),
            age: Age::Years(35),
        })
    }

    fn entry_zones() -> ZonePolygons {
        ZonePolygons {
            entry: square(0, 0, 100, 100),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_entry_and_exit() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());

        for frame in 0..=40u64 {
            let detections = if frame < 10 {
                frame_of(vec![person_at(1, 200.0, 200.0)])
            } else {
                frame_of(vec![person_at(1, 50.0, 50.0)])
            };
            tracker.observe(frame, &detections, measured).unwrap();
        }

        let history = tracker.history(1).unwrap();
        assert_eq!(history.entry_frame, Some(10));
        assert_eq!(history.entry_time.as_deref(), Some("2024-01-01 12:00:01"));
        assert_eq!(history.first_seen_frame, 0);
        assert_eq!(history.last_seen_frame, 40);

        let events = tracker.finalize();
        assert_eq!(events, vec![ZoneEvent::Exited { tracker_id: 1, frame: 40 }]);

        let history = tracker.history(1).unwrap();
        assert_eq!(history.exit_frame, Some(40));
        assert_eq!(history.exit_time.as_deref(), Some("2024-01-01 12:00:04"));
        assert_eq!(
            tracker.counters(),
            Counters {
                total: 1,
                entering: 1,
                exiting: 1,
                restricted: 0
            }
        );
    }

    #[test]
    fn test_attributes_captured_once() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());
        let mut calls = 0;

        for frame in 0..5u64 {
            tracker
                .observe(frame, &frame_of(vec![person_at(7, 50.0, 50.0)]), |bbox| {
                    calls += 1;
                    measured(bbox)
                })
                .unwrap();
        }

        assert_eq!(calls, 1);
        assert_eq!(tracker.counters().entering, 1);
        assert_eq!(tracker.counters().total, 1);
    }

    #[test]
    fn test_exit_polygon_also_triggers_entry() {
        let zones = ZonePolygons {
            exit: square(0, 0, 100, 100),
            ..Default::default()
        };
        let mut tracker = PersonTracker::new(zones, timeline());

        let update = tracker
            .observe(3, &frame_of(vec![person_at(2, 50.0, 50.0)]), measured)
            .unwrap();

        assert!(update.records[0].in_area2);
        assert!(!update.records[0].in_area1);
        assert_eq!(tracker.history(2).unwrap().entry_frame, Some(3));
    }

    #[test]
    fn test_restricted_recrossing_counts_once() {
        let zones = ZonePolygons {
            restricted: square(300, 300, 400, 400),
            ..Default::default()
        };
        let mut tracker = PersonTracker::new(zones, timeline());

        for frame in 0..30u64 {
            let inside = frame == 15 || frame == 20;
            let position = if inside { (350.0, 350.0) } else { (50.0, 50.0) };
            let update = tracker
                .observe(
                    frame,
                    &frame_of(vec![person_at(5, position.0, position.1)]),
                    measured,
                )
                .unwrap();

            assert_eq!(update.records[0].entered_restricted, frame >= 15);
            assert_eq!(update.records[0].in_restricted_area, inside);
            assert_eq!(
                tracker.counters().restricted,
                tracker.restricted_ids().len() as u64
            );
        }

        assert_eq!(tracker.counters().restricted, 1);
        assert_eq!(tracker.restricted_ids(), vec![5]);
        // Restricted is orthogonal to entry
        assert!(!tracker.history(5).unwrap().has_entered());
    }

    #[test]
    fn test_restricted_and_entry_in_same_frame() {
        let zones = ZonePolygons {
            entry: square(0, 0, 100, 100),
            restricted: square(0, 0, 100, 100),
            ..Default::default()
        };
        let mut tracker = PersonTracker::new(zones, timeline());

        let update = tracker
            .observe(0, &frame_of(vec![person_at(1, 50.0, 50.0)]), measured)
            .unwrap();

        assert_eq!(update.events.len(), 2);
        assert_eq!(update.events[0].kind(), "restricted");
        assert_eq!(update.events[1].kind(), "entry");
    }

    #[test]
    fn test_failing_analyzer_degrades() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());
        let detections = FrameDetections {
            people: vec![person_at(3, 50.0, 90.0)],
            objects: vec![ObjectObservation {
                class_id: 16,
                // inside the person box, low enough to be carried
                bbox: BoundingBox::new(40.0, 70.0, 60.0, 85.0),
                confidence: 0.6,
            }],
        };

        let update = tracker
            .observe(0, &detections, |_| AttributeOutcome::Degraded {
                reason: "model offline".to_string(),
            })
            .unwrap();

        let record = &update.records[0];
        assert_eq!(record.gender, UNKNOWN);
        assert_eq!(record.age, Age::Unknown);
        assert_eq!(record.carrying, Carrying::Items(vec!["dog".to_string()]));
        assert!(record.entry_time.is_some());
        assert_eq!(
            update.events,
            vec![ZoneEvent::Entered {
                tracker_id: 3,
                frame: 0,
                attributes_degraded: true
            }]
        );
        assert_eq!(tracker.counters().total, 1);
    }

    #[test]
    fn test_records_reflect_state_as_of_frame() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());

        let before = tracker
            .observe(0, &frame_of(vec![person_at(1, 200.0, 200.0)]), measured)
            .unwrap();
        assert_eq!(before.records[0].gender, UNKNOWN);
        assert_eq!(before.records[0].carrying, Carrying::NotAssessed);
        assert!(before.records[0].entry_time.is_none());

        let after = tracker
            .observe(1, &frame_of(vec![person_at(1, 50.0, 50.0)]), measured)
            .unwrap();
        assert_eq!(after.records[0].gender, "Man");
        assert_eq!(after.records[0].carrying, Carrying::Nothing);
        assert!(after.records[0].exit_time.is_none());
    }

    #[test]
    fn test_never_entered_gets_no_exit() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());
        tracker
            .observe(0, &frame_of(vec![person_at(9, 500.0, 500.0)]), measured)
            .unwrap();

        assert!(tracker.finalize().is_empty());
        assert!(tracker.history(9).unwrap().exit_time.is_none());
        assert_eq!(tracker.counters().exiting, 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());
        tracker
            .observe(0, &frame_of(vec![person_at(1, 50.0, 50.0)]), measured)
            .unwrap();

        assert_eq!(tracker.finalize().len(), 1);
        assert!(tracker.finalize().is_empty());
        assert_eq!(tracker.counters().exiting, 1);
        assert_eq!(
            tracker.observe(1, &FrameDetections::default(), measured),
            Err(TrackingError::Finalized)
        );
    }

    #[test]
    fn test_out_of_order_frames_rejected() {
        let mut tracker = PersonTracker::new(entry_zones(), timeline());
        tracker.observe(5, &FrameDetections::default(), measured).unwrap();

        assert_eq!(
            tracker.observe(5, &FrameDetections::default(), measured),
            Err(TrackingError::OutOfOrderFrame { last: 5, got: 5 })
        );
        assert_eq!(
            tracker.observe(3, &FrameDetections::default(), measured),
            Err(TrackingError::OutOfOrderFrame { last: 5, got: 3 })
        );
        assert!(tracker.observe(6, &FrameDetections::default(), measured).is_ok());
    }

    #[test]
    fn test_empty_zones_never_fire() {
        let mut tracker = PersonTracker::new(ZonePolygons::default(), timeline());
        let update = tracker
            .observe(0, &frame_of(vec![person_at(1, 0.0, 0.0)]), measured)
            .unwrap();

        assert!(update.events.is_empty());
        assert!(!update.records[0].in_area1);
        assert_eq!(tracker.counters(), Counters::default());
    }
}
