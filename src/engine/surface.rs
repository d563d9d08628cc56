//! Host-facing drawing surface
//!
//! The host owns the canvas and knows the viewport size; the engine only
//! draws into the canvas through a [`DrawContext`] that applies the zoom.

use image::{Rgba, RgbaImage};

use super::color::Color;
use super::compositor::{blend_pixel, draw_with_alpha};

/// Anything that can report the size of the visible area.
///
/// A width of 0 means the host has not laid out the view yet.
pub trait Viewport {
    fn viewport_size(&self) -> (u32, u32);
}

/// A mutable canvas the engine draws one frame into
pub trait Surface: Viewport {
    fn canvas_mut(&mut self) -> &mut RgbaImage;
}

/// A viewport with a fixed size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedViewport {
    pub width: u32,
    pub height: u32,
}

impl FixedViewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Viewport for FixedViewport {
    fn viewport_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// An in-memory surface: a canvas plus the size of the view showing it
#[derive(Debug, Clone)]
pub struct RasterSurface {
    canvas: RgbaImage,
    viewport: FixedViewport,
}

impl RasterSurface {
    /// Create a transparent canvas; the viewport starts at the canvas size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            viewport: FixedViewport::new(width, height),
        }
    }

    pub fn with_viewport(mut self, viewport: FixedViewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn set_viewport(&mut self, viewport: FixedViewport) {
        self.viewport = viewport;
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn into_canvas(self) -> RgbaImage {
        self.canvas
    }
}

impl Viewport for RasterSurface {
    fn viewport_size(&self) -> (u32, u32) {
        self.viewport.viewport_size()
    }
}

impl Surface for RasterSurface {
    fn canvas_mut(&mut self) -> &mut RgbaImage {
        &mut self.canvas
    }
}

/// A canvas with a zoom factor applied to everything drawn through it.
///
/// Coordinates passed in are image coordinates; scaling uses nearest
/// neighbour sampling.
pub struct DrawContext<'a> {
    target: &'a mut RgbaImage,
    zoom: f64,
}

impl<'a> DrawContext<'a> {
    pub fn new(target: &'a mut RgbaImage, zoom: f64) -> Self {
        Self { target, zoom }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Overwrite the whole canvas with `color`
    pub fn fill(&mut self, color: Color) {
        let px = color.to_rgba();
        for p in self.target.pixels_mut() {
            *p = px;
        }
    }

    /// Composite `source` with source-over at `alpha`, scaled by the zoom
    pub fn draw_image(&mut self, source: &RgbaImage, alpha: f32) {
        if alpha <= 0.0 || source.width() == 0 || source.height() == 0 {
            return;
        }
        if (self.zoom - 1.0).abs() < f64::EPSILON {
            draw_with_alpha(self.target, source, alpha);
            return;
        }

        let width = self
            .target
            .width()
            .min((source.width() as f64 * self.zoom).ceil() as u32);
        let height = self
            .target
            .height()
            .min((source.height() as f64 * self.zoom).ceil() as u32);
        for y in 0..height {
            let sy = ((y as f64 / self.zoom) as u32).min(source.height() - 1);
            for x in 0..width {
                let sx = ((x as f64 / self.zoom) as u32).min(source.width() - 1);
                let src = *source.get_pixel(sx, sy);
                blend_pixel(self.target.get_pixel_mut(x, y), src, alpha);
            }
        }
    }

    /// Draw a one pixel wide line between two image-space points
    pub fn draw_line(&mut self, from: (f64, f64), to: (f64, f64), color: Color) {
        let (x0, y0) = (from.0 * self.zoom, from.1 * self.zoom);
        let (x1, y1) = (to.0 * self.zoom, to.1 * self.zoom);
        let dx = x1 - x0;
        let dy = y1 - y0;
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            self.plot(x0 + dx * t, y0 + dy * t, color.to_rgba());
        }
    }

    /// Draw a closed outline through image-space points
    pub fn draw_polygon(&mut self, points: &[(f64, f64)], color: Color) {
        if points.len() < 2 {
            return;
        }
        for (i, from) in points.iter().enumerate() {
            let to = points[(i + 1) % points.len()];
            self.draw_line(*from, to, color);
        }
    }

    fn plot(&mut self, x: f64, y: f64, px: Rgba<u8>) {
        if x < 0.0 || y < 0.0 {
            return;
        }
        let (x, y) = (x.round() as u32, y.round() as u32);
        if x < self.target.width() && y < self.target.height() {
            blend_pixel(self.target.get_pixel_mut(x, y), px, 1.0);
        }
    }
}
