//! Base image layer
//!
//! Brightness is staged like every other parameter. The brightened copy
//! is cached and keyed by the brightness it was computed for, so a stale
//! cache is detected by value rather than by a dirty flag.

use image::RgbaImage;
use tracing::debug;

use super::layer::{Layer, LayerInfo, LayerKind};
use super::state::{ImageState, LayerState};
use crate::engine::compositor::{adjust_brightness, MIN_BRIGHTNESS, NEUTRAL_BRIGHTNESS};
use crate::engine::DrawContext;
use crate::error::{LayerError, Result};

pub const IMAGE_LAYER_NAME: &str = "Image";

#[derive(Debug, Clone)]
struct BrightnessCache {
    brightness: f32,
    image: RgbaImage,
}

#[derive(Debug, Clone)]
pub struct ImageLayer {
    info: LayerInfo,
    image: Option<RgbaImage>,
    brightness: f32,
    brightness_applied: f32,
    cache: Option<BrightnessCache>,
}

impl Default for ImageLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLayer {
    pub fn new() -> Self {
        Self {
            info: LayerInfo::fixed(IMAGE_LAYER_NAME),
            image: None,
            brightness: NEUTRAL_BRIGHTNESS,
            brightness_applied: NEUTRAL_BRIGHTNESS,
            cache: None,
        }
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    /// Replace the raster; `None` unloads it
    pub fn set_image(&mut self, image: Option<RgbaImage>) {
        self.image = image;
        self.cache = None;
    }

    pub fn width(&self) -> u32 {
        self.image.as_ref().map_or(0, |i| i.width())
    }

    pub fn height(&self) -> u32 {
        self.image.as_ref().map_or(0, |i| i.height())
    }

    /// Pending brightness in percent
    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn brightness_applied(&self) -> f32 {
        self.brightness_applied
    }

    /// Stage a brightness in percent (100 = unchanged, at least 1)
    pub fn set_brightness(&mut self, percent: f32) -> Result<()> {
        if !percent.is_finite() || percent < MIN_BRIGHTNESS {
            return Err(LayerError::invalid(
                "brightness",
                format!("{} must be at least {}", percent, MIN_BRIGHTNESS),
            ));
        }
        self.brightness = percent;
        Ok(())
    }

    /// The raster as it is drawn, with the applied brightness
    pub fn displayed_image(&mut self) -> Option<&RgbaImage> {
        let image = self.image.as_ref()?;
        if self.brightness_applied == NEUTRAL_BRIGHTNESS {
            return Some(image);
        }
        let stale = self
            .cache
            .as_ref()
            .map_or(true, |c| c.brightness != self.brightness_applied);
        if stale {
            debug!(brightness = self.brightness_applied, "recomputing brightness cache");
            self.cache = Some(BrightnessCache {
                brightness: self.brightness_applied,
                image: adjust_brightness(image, self.brightness_applied),
            });
        }
        self.cache.as_ref().map(|c| &c.image)
    }

    fn restore_settings(&mut self, s: &ImageState) {
        self.info.enabled = s.enabled;
        self.brightness = s.brightness.max(MIN_BRIGHTNESS);
        self.brightness_applied = s.brightness_applied.max(MIN_BRIGHTNESS);
    }
}

impl Layer for ImageLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut LayerInfo {
        &mut self.info
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Image
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        if let Some(image) = self.displayed_image() {
            ctx.draw_image(image, 1.0);
        }
    }

    fn state(&self) -> LayerState {
        LayerState::Image(ImageState {
            image: self.image.clone(),
            ..self.image_settings()
        })
    }

    fn settings(&self) -> LayerState {
        LayerState::Image(self.image_settings())
    }

    fn set_state(&mut self, state: LayerState) -> bool {
        let LayerState::Image(s) = state else {
            return false;
        };
        self.restore_settings(&s);
        if s.image.is_some() {
            self.set_image(s.image);
        }
        true
    }

    fn set_settings(&mut self, settings: &LayerState) -> bool {
        let LayerState::Image(s) = settings else {
            return false;
        };
        self.restore_settings(s);
        true
    }

    fn has_pending_changes(&self) -> bool {
        self.brightness != self.brightness_applied
    }

    fn apply(&mut self) -> bool {
        if !self.has_pending_changes() {
            return false;
        }
        self.brightness_applied = self.brightness;
        true
    }
}

impl ImageLayer {
    fn image_settings(&self) -> ImageState {
        ImageState {
            name: self.info.name.clone(),
            enabled: self.info.enabled,
            brightness: self.brightness,
            brightness_applied: self.brightness_applied,
            image: None,
        }
    }
}
