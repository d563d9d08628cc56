//! Combined layer: one shared raster for all classes
//!
//! The shared raster is partitioned by pixel value. Every non-transparent
//! pixel equals the applied color (alpha byte included) of exactly one
//! sub-layer, so ownership is read straight off the pixel. Sub-layers are
//! merged in insertion order and later ones win on overlap.

use std::collections::HashMap;

use image::RgbaImage;
use tracing::{debug, warn};

use super::layer::{Layer, LayerInfo, LayerKind};
use super::overlay::check_alpha;
use super::state::{CombinedState, CombinedSubLayerState, LayerState};
use crate::engine::{binary_mask, init_mask, merge_masks, new_mask, replace_color, Color, DrawContext};
use crate::error::{LayerError, Result};

pub const COMBINED_LAYER_NAME: &str = "Combined";

/// Default overall opacity of the shared raster
const DEFAULT_COMBINED_ALPHA: f32 = 0.5;

/// One class inside the combined layer
#[derive(Debug, Clone)]
pub struct CombinedSubLayer {
    name: String,
    color: Color,
    alpha: f32,
    applied_color: Color,
    previous_applied_color: Option<Color>,
}

impl CombinedSubLayer {
    fn new(name: String, color: Color, alpha: f32) -> Self {
        Self {
            name,
            color,
            alpha,
            applied_color: color.with_alpha(alpha),
            previous_applied_color: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pending color
    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    /// Pending alpha
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) -> Result<()> {
        self.alpha = check_alpha(alpha)?;
        Ok(())
    }

    /// The color that keys this class in the shared raster
    pub fn applied_color(&self) -> Color {
        self.applied_color
    }

    pub fn previous_applied_color(&self) -> Option<Color> {
        self.previous_applied_color
    }

    fn pending_color(&self) -> Color {
        self.color.with_alpha(self.alpha)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending_color() != self.applied_color
    }

    fn from_state(s: &CombinedSubLayerState) -> Self {
        Self {
            name: s.name.clone(),
            color: s.color,
            alpha: s.alpha.clamp(0.0, 1.0),
            applied_color: s.applied_color,
            previous_applied_color: s.previous_applied_color,
        }
    }

    fn sub_state(&self, active: bool) -> CombinedSubLayerState {
        CombinedSubLayerState {
            name: self.name.clone(),
            active,
            color: self.color,
            alpha: self.alpha,
            applied_color: self.applied_color,
            previous_applied_color: self.previous_applied_color,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CombinedLayer {
    info: LayerInfo,
    image: Option<RgbaImage>,
    alpha: f32,
    alpha_applied: f32,
    sub_layers: Vec<CombinedSubLayer>,
    active: Option<String>,
}

impl Default for CombinedLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CombinedLayer {
    pub fn new() -> Self {
        Self {
            info: LayerInfo::fixed(COMBINED_LAYER_NAME),
            image: None,
            alpha: DEFAULT_COMBINED_ALPHA,
            alpha_applied: DEFAULT_COMBINED_ALPHA,
            sub_layers: Vec::new(),
            active: None,
        }
    }

    /// The shared raster, `None` until the first sub-layer is added
    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Option<RgbaImage>) {
        self.image = image;
    }

    /// Pending overall alpha
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

    /// Add a class and merge its mask into the shared raster.
    ///
    /// `mask` may be any foreground/background raster; it is keyed with
    /// the class color first. Without a mask an empty one of
    /// `width` x `height` is used.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        color: Color,
        alpha: f32,
        mask: Option<&RgbaImage>,
        width: u32,
        height: u32,
    ) -> Result<&mut CombinedSubLayer> {
        let name = name.into();
        check_alpha(alpha)?;
        if self.sub_layer(&name).is_some() {
            return Err(LayerError::DuplicateLayer { name });
        }

        let sub = CombinedSubLayer::new(name.clone(), color, alpha);
        let keyed = match mask {
            Some(mask) => init_mask(mask, sub.applied_color),
            None => new_mask(width, height),
        };
        match self.image.as_mut() {
            None => self.image = Some(keyed),
            Some(shared) => {
                let written = merge_masks(&keyed, shared);
                debug!(sub_layer = %name, written, "merged mask into combined raster");
            }
        }

        self.sub_layers.push(sub);
        if self.active.is_none() {
            self.active = Some(name);
        }
        let last = self.sub_layers.len() - 1;
        Ok(&mut self.sub_layers[last])
    }

    pub fn sub_layers(&self) -> &[CombinedSubLayer] {
        &self.sub_layers
    }

    pub fn sub_layer(&self, name: &str) -> Option<&CombinedSubLayer> {
        self.sub_layers.iter().find(|s| s.name == name)
    }

    /// Mutable access for staging color/alpha edits
    pub fn sub_layer_mut(&mut self, name: &str) -> Option<&mut CombinedSubLayer> {
        self.sub_layers.iter_mut().find(|s| s.name == name)
    }

    pub fn active_sub_layer(&self) -> Option<&CombinedSubLayer> {
        self.active.as_deref().and_then(|name| self.sub_layer(name))
    }

    pub fn has_active_sub_layer(&self) -> bool {
        self.active_sub_layer().is_some()
    }

    pub fn activate(&mut self, name: &str) -> Result<()> {
        if self.sub_layer(name).is_none() {
            return Err(LayerError::LayerNotFound {
                name: name.to_string(),
            });
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Commit a sub-layer's pending color and alpha.
    ///
    /// Every shared pixel with the old applied color is rewritten to the
    /// new one in a single pass. Returns the number of pixels rewritten.
    pub fn apply_sub_layer(&mut self, name: &str) -> Result<usize> {
        let index = self
            .sub_layers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| LayerError::LayerNotFound {
                name: name.to_string(),
            })?;
        Ok(self.commit_sub_layer(index))
    }

    fn commit_sub_layer(&mut self, index: usize) -> usize {
        let sub = &mut self.sub_layers[index];
        let old = sub.applied_color;
        let new = sub.pending_color();
        sub.previous_applied_color = Some(old);
        sub.applied_color = new;

        let replaced = match self.image.as_mut() {
            Some(image) => replace_color(image, old, new),
            None => 0,
        };
        debug!(sub_layer = %sub.name, from = %old, to = %new, replaced, "committed sub-layer color");
        replaced
    }

    /// White where the shared raster belongs to `name`, black elsewhere
    pub fn binary_mask(&self, name: &str) -> Option<RgbaImage> {
        let sub = self.sub_layer(name)?;
        let image = self.image.as_ref()?;
        Some(binary_mask(image, sub.applied_color))
    }

    /// Drop the shared raster and all sub-layers
    pub fn clear(&mut self) {
        self.image = None;
        self.sub_layers.clear();
        self.active = None;
    }

    /// Drop sub-layers whose names are not listed, keeping the active one
    /// if it survives and falling back to the first otherwise
    pub(crate) fn retain_sub_layers(&mut self, names: &[String]) {
        self.sub_layers.retain(|s| names.contains(&s.name));
        if !self.has_active_sub_layer() {
            self.active = self.sub_layers.first().map(|s| s.name.clone());
        }
    }

    fn combined_settings(&self) -> CombinedState {
        let mut sub_layers = HashMap::new();
        let mut order = Vec::with_capacity(self.sub_layers.len());
        for sub in &self.sub_layers {
            let active = self.active.as_deref() == Some(sub.name.as_str());
            sub_layers.insert(sub.name.clone(), sub.sub_state(active));
            order.push(sub.name.clone());
        }
        CombinedState {
            name: self.info.name.clone(),
            enabled: self.info.enabled,
            alpha: self.alpha,
            alpha_applied: self.alpha_applied,
            sub_layers,
            order,
            image: None,
        }
    }

    /// Restore the overall parameters and the active sub-layer.
    ///
    /// With `recreate`, sub-layers the state lists but this layer lacks
    /// are re-created from the state, so pixels of a restored raster keep
    /// an owning class.
    fn restore_settings(&mut self, s: &CombinedState, recreate: bool) {
        self.info.enabled = s.enabled;
        self.alpha = s.alpha.clamp(0.0, 1.0);
        self.alpha_applied = s.alpha_applied.clamp(0.0, 1.0);
        for name in &s.order {
            let Some(sub_state) = s.sub_layers.get(name) else {
                warn!(sub_layer = %name, "ordered sub-layer missing from combined state");
                continue;
            };
            if self.sub_layer(name).is_none() {
                if !recreate {
                    continue;
                }
                debug!(sub_layer = %name, "re-creating sub-layer from state");
                self.sub_layers.push(CombinedSubLayer::from_state(sub_state));
            }
            // Known gap: sub-layer color, alpha and applied colors are not
            // restored, only the active flag.
            if sub_state.active {
                self.active = Some(name.clone());
            }
        }
        if recreate {
            let position = |name: &str| s.order.iter().position(|n| n == name).unwrap_or(usize::MAX);
            self.sub_layers.sort_by_key(|sub| position(&sub.name));
        }
        if !self.has_active_sub_layer() {
            self.active = self.sub_layers.first().map(|sub| sub.name.clone());
        }
    }
}

impl Layer for CombinedLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut LayerInfo {
        &mut self.info
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Combined
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        if let Some(image) = &self.image {
            ctx.draw_image(image, self.alpha_applied);
        }
    }

    fn state(&self) -> LayerState {
        LayerState::Combined(CombinedState {
            image: self.image.clone(),
            ..self.combined_settings()
        })
    }

    fn settings(&self) -> LayerState {
        LayerState::Combined(self.combined_settings())
    }

    fn set_state(&mut self, state: LayerState) -> bool {
        let LayerState::Combined(s) = state else {
            return false;
        };
        if s.image.is_some() {
            self.image = s.image.clone();
        }
        self.restore_settings(&s, true);
        true
    }

    fn set_settings(&mut self, settings: &LayerState) -> bool {
        let LayerState::Combined(s) = settings else {
            return false;
        };
        self.restore_settings(s, false);
        true
    }

    fn has_pending_changes(&self) -> bool {
        self.alpha != self.alpha_applied || self.sub_layers.iter().any(|s| s.has_pending_changes())
    }

    /// Commit the overall alpha and every sub-layer with pending edits
    fn apply(&mut self) -> bool {
        let mut changed = false;
        if self.alpha != self.alpha_applied {
            self.alpha_applied = self.alpha;
            changed = true;
        }
        for index in 0..self.sub_layers.len() {
            if self.sub_layers[index].has_pending_changes() {
                self.commit_sub_layer(index);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::color_histogram;
    use image::Rgba;
    use pretty_assertions::assert_eq;

    fn rect_mask(size: u32, x0: u32, x1: u32) -> RgbaImage {
        let mut mask = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]));
        for y in 0..size {
            for x in x0..x1 {
                mask.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        mask
    }

    fn two_classes() -> CombinedLayer {
        let mut layer = CombinedLayer::new();
        layer
            .add("left", Color::RED, 0.5, Some(&rect_mask(4, 0, 3)), 4, 4)
            .unwrap();
        layer
            .add("right", Color::BLUE, 0.5, Some(&rect_mask(4, 2, 4)), 4, 4)
            .unwrap();
        layer
    }

    #[test]
    fn test_first_sub_layer_active() {
        let layer = two_classes();
        assert_eq!(layer.active_sub_layer().unwrap().name(), "left");
    }

    #[test]
    fn test_partition_with_last_writer_wins() {
        let layer = two_classes();
        let counts = color_histogram(layer.image().unwrap());
        let red = Color::RED.with_alpha(0.5);
        let blue = Color::BLUE.with_alpha(0.5);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get(&red), Some(&8));
        assert_eq!(counts.get(&blue), Some(&8));
    }

    #[test]
    fn test_duplicate_sub_layer() {
        let mut layer = two_classes();
        let err = layer.add("left", Color::GREEN, 0.5, None, 4, 4).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_LAYER");
    }

    #[test]
    fn test_apply_sub_layer_rewrites_only_its_pixels() {
        let mut layer = two_classes();
        let sub = layer.sub_layer_mut("left").unwrap();
        sub.set_color(Color::GREEN);
        sub.set_alpha(1.0).unwrap();

        assert_eq!(layer.apply_sub_layer("left").unwrap(), 8);
        let counts = color_histogram(layer.image().unwrap());
        assert_eq!(counts.get(&Color::GREEN), Some(&8));
        assert_eq!(counts.get(&Color::BLUE.with_alpha(0.5)), Some(&8));
        assert_eq!(
            layer.sub_layer("left").unwrap().previous_applied_color(),
            Some(Color::RED.with_alpha(0.5))
        );

        let once = layer.image().cloned();
        assert_eq!(layer.apply_sub_layer("left").unwrap(), 0);
        assert_eq!(layer.image().cloned(), once);
    }

    #[test]
    fn test_apply_unknown_sub_layer() {
        let mut layer = two_classes();
        assert!(layer.apply_sub_layer("nope").is_err());
    }

    #[test]
    fn test_binary_mask_for_class() {
        let layer = two_classes();
        let mask = layer.binary_mask("left").unwrap();
        assert_eq!(*mask.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*mask.get_pixel(2, 0), Rgba([0, 0, 0, 255]));
        assert!(layer.binary_mask("nope").is_none());
    }

    #[test]
    fn test_settings_restore_skips_sub_layer_colors() {
        let mut layer = two_classes();
        let saved = layer.settings();
        layer.sub_layer_mut("left").unwrap().set_color(Color::GREEN);
        layer.apply_sub_layer("left").unwrap();
        layer.activate("right").unwrap();

        assert!(layer.set_settings(&saved));
        assert_eq!(layer.active_sub_layer().unwrap().name(), "left");
        assert_eq!(layer.sub_layer("left").unwrap().color(), Color::GREEN);
    }

    #[test]
    fn test_overall_alpha_apply() {
        let mut layer = two_classes();
        layer.set_alpha(0.9).unwrap();
        assert!(layer.has_pending_changes());
        assert!(layer.apply());
        assert_eq!(layer.alpha_applied(), 0.9);
        assert!(!layer.apply());
    }

    #[test]
    fn test_clear() {
        let mut layer = two_classes();
        layer.clear();
        assert!(layer.image().is_none());
        assert!(layer.sub_layers().is_empty());
        assert!(!layer.has_active_sub_layer());
    }
}
