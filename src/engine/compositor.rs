//! Pixel-level compositing
//!
//! Masks are color-keyed: a pixel is either fully transparent or exactly
//! the color of the class that owns it. Everything here works on that
//! representation, so ownership never needs metadata beyond the pixel
//! value itself.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use super::color::Color;

// ============================================================================
// Constants
// ============================================================================

/// Brightness that leaves the image untouched (percent)
pub const NEUTRAL_BRIGHTNESS: f32 = 100.0;

/// Lowest accepted brightness (percent)
pub const MIN_BRIGHTNESS: f32 = 1.0;

const TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a fully transparent mask
pub fn new_mask(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, TRANSPARENT_PIXEL)
}

/// Whether a pixel of an arbitrary source mask marks the class.
///
/// Transparent pixels and black pixels are background, anything else is
/// foreground. This accepts both keyed masks and plain black/white ones.
#[inline]
pub fn is_foreground(px: &Rgba<u8>) -> bool {
    let [r, g, b, a] = px.0;
    a > 0 && (r > 0 || g > 0 || b > 0)
}

/// Source-over blend of `src` onto `dst` at an extra opacity in [0, 1].
///
/// Both pixels carry straight alpha.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: f32) {
    let src_a = (src[3] as f32 / 255.0) * alpha.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    let blend = |s: u8, d: u8| {
        let s = s as f32 / 255.0;
        let d = d as f32 / 255.0;
        ((s * src_a + d * dst_a * (1.0 - src_a)) / out_a * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    *dst = Rgba([
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]);
}

// ============================================================================
// Raster Operations
// ============================================================================

/// Draw `source` onto `target` at 1:1 scale with source-over compositing.
///
/// Only the overlapping region is touched.
pub fn draw_with_alpha(target: &mut RgbaImage, source: &RgbaImage, alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let width = target.width().min(source.width());
    let height = target.height().min(source.height());
    for y in 0..height {
        for x in 0..width {
            let src = *source.get_pixel(x, y);
            blend_pixel(target.get_pixel_mut(x, y), src, alpha);
        }
    }
}

/// Scale each color channel by `percent / 100`, leaving alpha alone.
///
/// `percent` is clamped to at least [`MIN_BRIGHTNESS`].
pub fn adjust_brightness(source: &RgbaImage, percent: f32) -> RgbaImage {
    let factor = percent.max(MIN_BRIGHTNESS) / NEUTRAL_BRIGHTNESS;
    let mut result = source.clone();
    for px in result.pixels_mut() {
        for channel in px.0.iter_mut().take(3) {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    result
}

/// Turn an arbitrary mask into a keyed one: foreground pixels become
/// exactly `color`, everything else becomes transparent.
pub fn init_mask(source: &RgbaImage, color: Color) -> RgbaImage {
    let keyed = color.to_rgba();
    let mut result = new_mask(source.width(), source.height());
    for (x, y, px) in source.enumerate_pixels() {
        if is_foreground(px) {
            result.put_pixel(x, y, keyed);
        }
    }
    result
}

/// Merge a keyed mask into the shared raster.
///
/// Wherever `incoming` is non-transparent the shared pixel is overwritten,
/// so later merges win on overlap. Returns the number of pixels written.
pub fn merge_masks(incoming: &RgbaImage, shared: &mut RgbaImage) -> usize {
    let width = shared.width().min(incoming.width());
    let height = shared.height().min(incoming.height());
    let mut written = 0;
    for y in 0..height {
        for x in 0..width {
            let px = incoming.get_pixel(x, y);
            if px[3] != 0 {
                shared.put_pixel(x, y, *px);
                written += 1;
            }
        }
    }
    written
}

/// Rewrite every pixel equal to `old` as `new` in a single pass.
///
/// Returns the number of pixels replaced; nothing is touched when the two
/// colors are identical.
pub fn replace_color(raster: &mut RgbaImage, old: Color, new: Color) -> usize {
    if old == new {
        return 0;
    }
    let old = old.to_rgba();
    let new = new.to_rgba();
    let mut replaced = 0;
    for px in raster.pixels_mut() {
        if *px == old {
            *px = new;
            replaced += 1;
        }
    }
    replaced
}

/// White where the raster equals `color` exactly, opaque black elsewhere.
///
/// The comparison is against the class color, so transparent regions and
/// other classes both end up black.
pub fn binary_mask(raster: &RgbaImage, color: Color) -> RgbaImage {
    let target = color.to_rgba();
    let white = Color::WHITE.to_rgba();
    let black = Color::BLACK.to_rgba();
    let mut result = RgbaImage::from_pixel(raster.width(), raster.height(), black);
    for (x, y, px) in raster.enumerate_pixels() {
        if *px == target {
            result.put_pixel(x, y, white);
        }
    }
    result
}

/// Count the non-transparent pixels of a raster grouped by color
pub fn color_histogram(raster: &RgbaImage) -> HashMap<Color, usize> {
    let mut counts = HashMap::new();
    for px in raster.pixels().filter(|px| px[3] != 0) {
        *counts.entry(Color::from(*px)).or_insert(0) += 1;
    }
    counts
}
