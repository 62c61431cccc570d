//! Detection contracts shared between the detector, the tracker and the report.

use crate::zones::Point;
use serde::{Deserialize, Serialize};

/// COCO class id for people
pub const PERSON_CLASS: u32 = 0;

/// COCO class ids treated as bags (backpack, handbag, suitcase)
pub const BAG_CLASSES: [u32; 3] = [24, 26, 28];

pub const CAT_CLASS: u32 = 15;

pub const DOG_CLASS: u32 = 16;

/// Bounding box in corner form (x1, y1, x2, y2), pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }

    /// Bottom-center pixel, the point used for every zone test
    pub fn reference_point(&self) -> Point {
        Point::new(((self.x1 + self.x2) / 2.0) as i32, self.y2 as i32)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        };

        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Objects a person can be seen carrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryableKind {
    Bag,
    Cat,
    Dog,
}

impl CarryableKind {
    pub fn from_class_id(class_id: u32) -> Option<Self> {
        match class_id {
            id if BAG_CLASSES.contains(&id) => Some(Self::Bag),
            CAT_CLASS => Some(Self::Cat),
            DOG_CLASS => Some(Self::Dog),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Bag => "bag",
            Self::Cat => "cat",
            Self::Dog => "dog",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_point_truncates() {
        let bbox = BoundingBox::new(10.0, 20.0, 31.0, 99.9);
        assert_eq!(bbox.reference_point(), Point::new(20, 99));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_carryable_classes() {
        assert_eq!(CarryableKind::from_class_id(24), Some(CarryableKind::Bag));
        assert_eq!(CarryableKind::from_class_id(26), Some(CarryableKind::Bag));
        assert_eq!(CarryableKind::from_class_id(28), Some(CarryableKind::Bag));
        assert_eq!(CarryableKind::from_class_id(15), Some(CarryableKind::Cat));
        assert_eq!(CarryableKind::from_class_id(16), Some(CarryableKind::Dog));
        assert_eq!(CarryableKind::from_class_id(PERSON_CLASS), None);
        assert_eq!(CarryableKind::from_class_id(2), None);
    }
}
