//! Distinct colors for newly created annotation layers

use crate::engine::Color;
use crate::error::{LayerError, Result};

/// Opaque, easily told apart colors handed out in order
pub const DEFAULT_PALETTE: [Color; 10] = [
    Color::rgb(0, 0, 255),
    Color::rgb(255, 0, 0),
    Color::rgb(0, 255, 0),
    Color::rgb(0, 255, 255),
    Color::rgb(255, 0, 255),
    Color::rgb(255, 255, 0),
    Color::rgb(255, 175, 175),
    Color::rgb(255, 200, 0),
    Color::rgb(128, 0, 128),
    Color::rgb(0, 128, 128),
];

/// Hands out palette colors in order, wrapping around at the end
#[derive(Debug, Clone, PartialEq)]
pub struct ColorProvider {
    palette: Vec<Color>,
    next: usize,
}

impl Default for ColorProvider {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_vec(),
            next: 0,
        }
    }
}

impl ColorProvider {
    pub fn new(palette: Vec<Color>) -> Result<Self> {
        if palette.is_empty() {
            return Err(LayerError::invalid("palette", "needs at least one color"));
        }
        Ok(Self { palette, next: 0 })
    }

    pub fn palette(&self) -> &[Color] {
        &self.palette
    }

    pub fn next_color(&mut self) -> Color {
        let color = self.palette[self.next % self.palette.len()];
        self.next = (self.next + 1) % self.palette.len();
        color
    }

    /// Start over with the first palette color
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

impl Iterator for ColorProvider {
    type Item = Color;

    fn next(&mut self) -> Option<Color> {
        Some(self.next_color())
    }
}
