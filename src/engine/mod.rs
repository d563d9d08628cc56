//! Raster Engine Module
//!
//! Pixel-level building blocks shared by all layers:
//! - Colors with exact equality (class identity)
//! - Compositing, brightness and color-keyed mask operations
//! - The drawing context and host surface traits

pub mod color;
pub mod compositor;
pub mod surface;

pub use color::Color;
pub use compositor::{
    adjust_brightness, binary_mask, blend_pixel, color_histogram, draw_with_alpha, init_mask,
    merge_masks, new_mask, replace_color,
};
pub use surface::{DrawContext, FixedViewport, RasterSurface, Surface, Viewport};
