//! Zone polygons used for crossing detection.
//!
//! Zones arrive from the upload request as arrays of `[x, y]` integer pairs. An empty
//! polygon means the zone is not configured: nothing is ever inside it.

use serde::{Deserialize, Serialize};

/// Integer pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// Closed polygon; the last vertex connects back to the first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point-in-polygon test. Points on an edge or vertex count as inside.
    ///
    /// Polygons with fewer than three vertices degrade gracefully: a single vertex
    /// contains only itself and two vertices contain only the segment between them.
    pub fn contains(&self, point: Point) -> bool {
        if self.points.is_empty() {
            return false;
        }

        if self.on_boundary(point) {
            return true;
        }

        if self.points.len() < 3 {
            return false;
        }

        // Even-odd ray cast towards +x. Products of i32 differences need i128.
        let (px, py) = (i128::from(point.x), i128::from(point.y));
        let mut inside = false;
        let mut j = self.points.len() - 1;

        for i in 0..self.points.len() {
            let (ax, ay) = (i128::from(self.points[i].x), i128::from(self.points[i].y));
            let (bx, by) = (i128::from(self.points[j].x), i128::from(self.points[j].y));

            if (ay > py) != (by > py) {
                let dy = by - ay;
                let lhs = (px - ax) * dy;
                let rhs = (py - ay) * (bx - ax);
                let crosses = if dy > 0 { lhs < rhs } else { lhs > rhs };
                if crosses {
                    inside = !inside;
                }
            }

            j = i;
        }

        inside
    }

    fn on_boundary(&self, point: Point) -> bool {
        let n = self.points.len();
        (0..n).any(|i| on_segment(self.points[i], self.points[(i + 1) % n], point))
    }
}

impl From<Vec<[i32; 2]>> for Polygon {
    fn from(points: Vec<[i32; 2]>) -> Self {
        Self::new(points.into_iter().map(Point::from).collect())
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let (ax, ay) = (i128::from(a.x), i128::from(a.y));
    let (bx, by) = (i128::from(b.x), i128::from(b.y));
    let (px, py) = (i128::from(p.x), i128::from(p.y));

    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0
        && px >= ax.min(bx)
        && px <= ax.max(bx)
        && py >= ay.min(by)
        && py <= ay.max(by)
}

/// The three zones configured for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePolygons {
    #[serde(default)]
    pub entry: Polygon,
    #[serde(default)]
    pub exit: Polygon,
    #[serde(default)]
    pub restricted: Polygon,
}

impl ZonePolygons {
    /// Classify a reference point against all three zones
    pub fn classify(&self, point: Point) -> ZoneHits {
        ZoneHits {
            entry: self.entry.contains(point),
            exit: self.exit.contains(point),
            restricted: self.restricted.contains(point),
        }
    }
}

/// Zone membership of a single reference point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneHits {
    pub entry: bool,
    pub exit: bool,
    pub restricted: bool,
}

impl ZoneHits {
    /// Entry and exit polygons both count as the monitored doorway
    pub fn in_doorway(&self) -> bool {
        self.entry || self.exit
    }
}
