//! Carried-object inference.
//!
//! An object counts as carried when its box lies strictly inside the person box and its
//! center sits in the lower 40% of that box.

use common::detections::{BoundingBox, CarryableKind};
use common::report::Carrying;

use crate::source::ObjectObservation;

/// Fraction of the person height above which a carried item's center must lie below
const CARRY_LINE: f32 = 0.6;

pub fn is_carried(object: &BoundingBox, person: &BoundingBox) -> bool {
    let contained = object.x1 > person.x1
        && object.x2 < person.x2
        && object.y1 > person.y1
        && object.y2 < person.y2;

    let carry_line = person.y1 + (person.y2 - person.y1) * CARRY_LINE;

    contained && object.center_y() > carry_line
}

/// Labels of every object carried by `person`, in object order. Duplicates are kept.
pub fn carried_items(person: &BoundingBox, objects: &[ObjectObservation]) -> Carrying {
    let items = objects
        .iter()
        .filter(|object| is_carried(&object.bbox, person))
        .filter_map(|object| CarryableKind::from_class_id(object.class_id))
        .map(|kind| kind.label().to_string())
        .collect();

    Carrying::from_items(items)
}
