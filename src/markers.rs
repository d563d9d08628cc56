//! Transient marker path
//!
//! Markers guide the user while dragging: every point is stored, but a
//! shape is only plotted once the pointer has moved more than twice the
//! extent away from the last plotted point. Markers are not part of the
//! undo history.

use serde::{Deserialize, Serialize};

use crate::config::MarkerConfig;
use crate::engine::{Color, DrawContext};

/// Number of segments used to approximate a circle outline
const CIRCLE_SEGMENTS: usize = 24;

/// Shape drawn at each plotted marker point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerShape {
    None,
    #[default]
    Box,
    Circle,
    Triangle,
}

/// A point in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPoint {
    pub x: f64,
    pub y: f64,
}

impl MarkerPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &MarkerPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Append-only marker path with distance-gated shapes
#[derive(Debug, Clone)]
pub struct Markers {
    points: Vec<MarkerPoint>,
    /// Indices into `points` of the points that get a shape
    plotted: Vec<usize>,
    shape: MarkerShape,
    color: Color,
    extent: u32,
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(&MarkerConfig::default())
    }
}

impl Markers {
    pub fn new(config: &MarkerConfig) -> Self {
        Self {
            points: Vec::new(),
            plotted: Vec::new(),
            shape: config.shape,
            color: config.color,
            extent: config.extent,
        }
    }

    /// Append a point.
    ///
    /// Returns whether a repaint is needed, which is the case whenever
    /// the path is non-empty afterwards.
    pub fn add(&mut self, x: f64, y: f64) -> bool {
        let point = MarkerPoint::new(x, y);
        let threshold = 2.0 * self.extent as f64;
        let far_enough = match self.plotted.last() {
            None => true,
            Some(&last) => self.points[last].distance(&point) > threshold,
        };
        if far_enough {
            self.plotted.push(self.points.len());
        }
        self.points.push(point);
        !self.is_empty()
    }

    /// Drop all points
    pub fn clear(&mut self) {
        self.points.clear();
        self.plotted.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[MarkerPoint] {
        &self.points
    }

    /// Points that get a shape drawn, in insertion order
    pub fn plotted_points(&self) -> impl Iterator<Item = &MarkerPoint> {
        self.plotted.iter().map(|&i| &self.points[i])
    }

    /// Number of shapes drawn; always 0 for [`MarkerShape::None`]
    pub fn shape_count(&self) -> usize {
        match self.shape {
            MarkerShape::None => 0,
            _ => self.plotted.len(),
        }
    }

    pub fn shape(&self) -> MarkerShape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: MarkerShape) {
        self.shape = shape;
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Change the extent; only affects points added afterwards
    pub fn set_extent(&mut self, extent: u32) {
        self.extent = extent;
    }

    pub fn draw(&self, ctx: &mut DrawContext<'_>) {
        let e = self.extent as f64;
        for p in self.plotted_points() {
            match self.shape {
                MarkerShape::None => return,
                MarkerShape::Box => ctx.draw_polygon(
                    &[
                        (p.x - e, p.y - e),
                        (p.x + e, p.y - e),
                        (p.x + e, p.y + e),
                        (p.x - e, p.y + e),
                    ],
                    self.color,
                ),
                MarkerShape::Circle => {
                    let outline: Vec<(f64, f64)> = (0..CIRCLE_SEGMENTS)
                        .map(|i| {
                            let angle =
                                i as f64 / CIRCLE_SEGMENTS as f64 * std::f64::consts::TAU;
                            (p.x + e * angle.cos(), p.y + e * angle.sin())
                        })
                        .collect();
                    ctx.draw_polygon(&outline, self.color);
                }
                MarkerShape::Triangle => ctx.draw_polygon(
                    &[(p.x, p.y - e), (p.x + e, p.y + e), (p.x - e, p.y + e)],
                    self.color,
                ),
            }
        }
    }
}
