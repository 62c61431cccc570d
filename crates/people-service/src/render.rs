//! Frame annotation: person boxes, zone outlines and running counters.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use common::report::PersonDetection;
use common::zones::{Polygon, ZonePolygons};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::tracking::Counters;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

const ZONE_THICKNESS: i32 = 2;

/// Draws the overlay on decoded frames. Text is skipped when no font is loaded.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load a TrueType/OpenType font for labels
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self::new(Some(font)))
    }

    /// Annotate one frame in place. Only people with a recorded entry get a box.
    pub fn draw(
        &self,
        frame: &mut RgbImage,
        records: &[PersonDetection],
        zones: &ZonePolygons,
        counters: Counters,
    ) {
        for record in records.iter().filter(|r| r.entry_time.is_some()) {
            self.draw_person(frame, record);
        }

        draw_polygon(frame, &zones.entry, BLUE);
        draw_polygon(frame, &zones.exit, GREEN);
        draw_polygon(frame, &zones.restricted, RED);

        if let Some(anchor) = zones.restricted.points().first() {
            self.text(frame, "RESTRICTED AREA", anchor.x, anchor.y - 30, 22.0, RED);
        }

        self.text(frame, &format!("Total: {}", counters.total), 50, 25, 32.0, WHITE);
        self.text(frame, &format!("Entering: {}", counters.entering), 50, 75, 32.0, GREEN);
        self.text(frame, &format!("Exiting: {}", counters.exiting), 50, 125, 32.0, RED);
        self.text(
            frame,
            &format!("Restricted Area: {}", counters.restricted),
            50,
            175,
            32.0,
            RED,
        );
    }

    fn draw_person(&self, frame: &mut RgbImage, record: &PersonDetection) {
        let [x1, y1, x2, y2] = record.bbox;
        let (color, thickness) = if record.entered_restricted {
            (RED, 3)
        } else {
            (GREEN, 2)
        };
        draw_box(frame, x1, y1, x2, y2, color, thickness);

        let mut label = format!("ID: {} | {}, {}", record.tracker_id, record.gender, record.age);
        if record.entered_restricted {
            label.push_str(" | RESTRICTED");
        }
        self.text(frame, &label, x1 as i32, y1 as i32 - 26, 16.0, WHITE);
    }

    fn text(&self, frame: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, color, x, y, PxScale::from(size), font, text);
        }
    }
}

/// Hollow box drawn inward `thickness` pixels from the edges
fn draw_box(frame: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>, thickness: i32) {
    let (x1, y1) = (x1.round() as i32, y1.round() as i32);
    let (x2, y2) = (x2.round() as i32, y2.round() as i32);

    for inset in 0..thickness {
        let width = x2 - x1 - 2 * inset;
        let height = y2 - y1 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Closed outline; one- and two-point zones render as a dot or a segment
fn draw_polygon(frame: &mut RgbImage, polygon: &Polygon, color: Rgb<u8>) {
    let points = polygon.points();
    if points.is_empty() {
        return;
    }

    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        for offset in 0..ZONE_THICKNESS {
            let o = offset as f32;
            draw_line_segment_mut(
                frame,
                (a.x as f32 + o, a.y as f32),
                (b.x as f32 + o, b.y as f32),
                color,
            );
            draw_line_segment_mut(
                frame,
                (a.x as f32, a.y as f32 + o),
                (b.x as f32, b.y as f32 + o),
                color,
            );
        }
    }
}
