//! Overlay layer: one keyed mask per class (split mode)
//!
//! Mask pixels are either transparent or exactly the applied color.
//! Color and alpha edits are staged and only committed by [`Layer::apply`],
//! which is also the only place the mask gets recolored.

use image::RgbaImage;
use tracing::debug;

use super::layer::{Layer, LayerInfo, LayerKind};
use super::state::{LayerState, OverlayState};
use crate::engine::{binary_mask, new_mask, replace_color, Color, DrawContext};
use crate::error::{LayerError, Result};

#[derive(Debug, Clone)]
pub struct OverlayLayer {
    info: LayerInfo,
    image: RgbaImage,
    color: Color,
    color_applied: Color,
    alpha: f32,
    alpha_applied: f32,
    active: bool,
}

pub(crate) fn check_alpha(alpha: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(LayerError::invalid(
            "alpha",
            format!("{} is outside [0, 1]", alpha),
        ));
    }
    Ok(alpha)
}

impl OverlayLayer {
    /// Create an overlay around an already keyed mask
    pub(crate) fn new(name: impl Into<String>, color: Color, alpha: f32, image: RgbaImage) -> Self {
        Self {
            info: LayerInfo {
                name: name.into(),
                enabled: true,
                removable: true,
                has_actions: true,
            },
            image,
            color,
            color_applied: color,
            alpha,
            alpha_applied: alpha,
            active: false,
        }
    }

    /// Re-create an overlay from a snapshot; a missing raster becomes an
    /// empty mask of the given size
    pub(crate) fn from_state(state: OverlayState, width: u32, height: u32) -> Self {
        let mut layer = Self::new(
            state.name.clone(),
            state.color_applied,
            state.alpha_applied,
            new_mask(width, height),
        );
        layer.restore(state);
        layer
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Mutable mask access for painting tools.
    ///
    /// Only transparent pixels and the applied color may be written.
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Pending color
    pub fn color(&self) -> Color {
        self.color
    }

    pub fn color_applied(&self) -> Color {
        self.color_applied
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    /// Pending alpha
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn alpha_applied(&self) -> f32 {
        self.alpha_applied
    }

    pub fn set_alpha(&mut self, alpha: f32) -> Result<()> {
        self.alpha = check_alpha(alpha)?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn set_removable(&mut self, removable: bool) {
        self.info.removable = removable;
    }

    pub fn set_actions_available(&mut self, available: bool) {
        self.info.has_actions = available;
    }

    /// White where the mask has the applied color, black elsewhere
    pub fn binary_mask(&self) -> RgbaImage {
        binary_mask(&self.image, self.color_applied)
    }

    fn restore(&mut self, s: OverlayState) {
        self.restore_settings(&s);
        if let Some(image) = s.image {
            self.image = image;
        }
    }

    fn restore_settings(&mut self, s: &OverlayState) {
        self.info.enabled = s.enabled;
        self.info.removable = s.removable;
        self.info.has_actions = s.actions_available;
        self.active = s.active;
        self.color = s.color;
        self.color_applied = s.color_applied;
        self.alpha = s.alpha.clamp(0.0, 1.0);
        self.alpha_applied = s.alpha_applied.clamp(0.0, 1.0);
    }

    fn overlay_settings(&self) -> OverlayState {
        OverlayState {
            name: self.info.name.clone(),
            enabled: self.info.enabled,
            removable: self.info.removable,
            actions_available: self.info.has_actions,
            active: self.active,
            color: self.color,
            color_applied: self.color_applied,
            alpha: self.alpha,
            alpha_applied: self.alpha_applied,
            image: None,
        }
    }
}

impl Layer for OverlayLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut LayerInfo {
        &mut self.info
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Overlay
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        ctx.draw_image(&self.image, self.alpha_applied);
    }

    fn state(&self) -> LayerState {
        LayerState::Overlay(OverlayState {
            image: Some(self.image.clone()),
            ..self.overlay_settings()
        })
    }

    fn settings(&self) -> LayerState {
        LayerState::Overlay(self.overlay_settings())
    }

    fn set_state(&mut self, state: LayerState) -> bool {
        let LayerState::Overlay(s) = state else {
            return false;
        };
        self.restore(s);
        true
    }

    fn set_settings(&mut self, settings: &LayerState) -> bool {
        let LayerState::Overlay(s) = settings else {
            return false;
        };
        // The mask stays keyed by the applied color.
        if s.color_applied != self.color_applied {
            replace_color(&mut self.image, self.color_applied, s.color_applied);
        }
        self.restore_settings(s);
        true
    }

    fn has_pending_changes(&self) -> bool {
        self.color != self.color_applied || self.alpha != self.alpha_applied
    }

    fn apply(&mut self) -> bool {
        if !self.has_pending_changes() {
            return false;
        }
        if self.color != self.color_applied {
            let replaced = replace_color(&mut self.image, self.color_applied, self.color);
            debug!(
                layer = %self.info.name,
                from = %self.color_applied,
                to = %self.color,
                replaced,
                "recolored overlay"
            );
            self.color_applied = self.color;
        }
        self.alpha_applied = self.alpha;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::color_histogram;
    use crate::engine::compositor::init_mask;
    use image::Rgba;

    fn overlay() -> OverlayLayer {
        let mut source = RgbaImage::new(3, 3);
        source.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        source.put_pixel(2, 1, Rgba([255, 255, 255, 255]));
        OverlayLayer::new("cat", Color::RED, 0.5, init_mask(&source, Color::RED))
    }

    #[test]
    fn test_defaults() {
        let layer = overlay();
        assert!(layer.is_removable());
        assert!(layer.has_actions());
        assert!(!layer.is_active());
        assert!(!layer.has_pending_changes());
    }

    #[test]
    fn test_apply_recolors_mask() {
        let mut layer = overlay();
        layer.set_color(Color::GREEN);
        assert_eq!(layer.color_applied(), Color::RED);
        assert!(layer.apply());

        let counts = color_histogram(layer.image());
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&Color::GREEN), Some(&2));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut layer = overlay();
        layer.set_color(Color::BLUE);
        layer.set_alpha(0.8).unwrap();
        layer.apply();
        let once = layer.image().clone();
        assert!(!layer.apply());
        assert_eq!(layer.image(), &once);
        assert_eq!(layer.alpha_applied(), 0.8);
    }

    #[test]
    fn test_alpha_out_of_range() {
        let mut layer = overlay();
        assert!(layer.set_alpha(1.5).is_err());
        assert_eq!(layer.alpha(), 0.5);
    }

    #[test]
    fn test_binary_mask() {
        let layer = overlay();
        let binary = layer.binary_mask();
        assert_eq!(*binary.get_pixel(1, 1), Rgba([255, 255, 255, 255]));
        assert_eq!(*binary.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_from_state_without_raster() {
        let state = match overlay().settings() {
            LayerState::Overlay(s) => s,
            _ => unreachable!(),
        };
        let layer = OverlayLayer::from_state(state, 4, 5);
        assert_eq!(layer.image().dimensions(), (4, 5));
        assert_eq!(layer.name(), "cat");
    }
}
