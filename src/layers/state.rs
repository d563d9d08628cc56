//! Serializable layer snapshots
//!
//! A `LayerState` mirrors one layer variant minus behaviour. Rasters are
//! carried in memory for undo/redo but never serialized: exported
//! settings hold names, flags, colors and alphas only.

use std::collections::HashMap;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::layer::LayerKind;
use crate::engine::Color;

/// Background fill state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundState {
    pub name: String,
    pub enabled: bool,
    pub color: Color,
}

/// Base image state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageState {
    pub name: String,
    pub enabled: bool,
    /// Pending brightness in percent
    pub brightness: f32,
    pub brightness_applied: f32,
    #[serde(skip)]
    pub image: Option<RgbaImage>,
}

/// State of one overlay (split mode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub name: String,
    pub enabled: bool,
    pub removable: bool,
    pub actions_available: bool,
    pub active: bool,
    /// Pending color
    pub color: Color,
    pub color_applied: Color,
    /// Pending alpha
    pub alpha: f32,
    pub alpha_applied: f32,
    #[serde(skip)]
    pub image: Option<RgbaImage>,
}

/// State of one class inside the combined layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSubLayerState {
    pub name: String,
    pub active: bool,
    /// Pending color
    pub color: Color,
    /// Pending alpha
    pub alpha: f32,
    /// Applied color with the applied alpha baked into its alpha byte
    pub applied_color: Color,
    pub previous_applied_color: Option<Color>,
}

/// State of the combined layer and its classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedState {
    pub name: String,
    pub enabled: bool,
    /// Pending overall alpha
    pub alpha: f32,
    pub alpha_applied: f32,
    pub sub_layers: HashMap<String, CombinedSubLayerState>,
    /// Sub-layer names in placement order
    pub order: Vec<String>,
    #[serde(skip)]
    pub image: Option<RgbaImage>,
}

/// Snapshot of any layer variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerState {
    Background(BackgroundState),
    Image(ImageState),
    Overlay(OverlayState),
    Combined(CombinedState),
}

impl LayerState {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerState::Background(_) => LayerKind::Background,
            LayerState::Image(_) => LayerKind::Image,
            LayerState::Overlay(_) => LayerKind::Overlay,
            LayerState::Combined(_) => LayerKind::Combined,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LayerState::Background(s) => &s.name,
            LayerState::Image(s) => &s.name,
            LayerState::Overlay(s) => &s.name,
            LayerState::Combined(s) => &s.name,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            LayerState::Background(s) => s.enabled,
            LayerState::Image(s) => s.enabled,
            LayerState::Overlay(s) => s.enabled,
            LayerState::Combined(s) => s.enabled,
        }
    }

    /// Whether a raster is attached
    pub fn has_raster(&self) -> bool {
        match self {
            LayerState::Background(_) => false,
            LayerState::Image(s) => s.image.is_some(),
            LayerState::Overlay(s) => s.image.is_some(),
            LayerState::Combined(s) => s.image.is_some(),
        }
    }

    /// The same state with any raster dropped
    pub fn into_settings(self) -> LayerState {
        match self {
            LayerState::Image(s) => LayerState::Image(ImageState { image: None, ..s }),
            LayerState::Overlay(s) => LayerState::Overlay(OverlayState { image: None, ..s }),
            LayerState::Combined(s) => LayerState::Combined(CombinedState { image: None, ..s }),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn overlay_state() -> LayerState {
        LayerState::Overlay(OverlayState {
            name: "cat".to_string(),
            enabled: true,
            removable: true,
            actions_available: false,
            active: true,
            color: Color::RED,
            color_applied: Color::RED,
            alpha: 0.5,
            alpha_applied: 0.5,
            image: Some(RgbaImage::new(2, 2)),
        })
    }

    #[test]
    fn test_tagged_json_skips_raster() {
        let json = serde_json::to_value(overlay_state()).unwrap();
        assert_eq!(json["type"], "overlay");
        assert_eq!(json["color"], "#FF0000FF");
        assert!(json.get("image").is_none());

        let back: LayerState = serde_json::from_value(json).unwrap();
        assert_eq!(back, overlay_state().into_settings());
        assert!(!back.has_raster());
    }

    #[test]
    fn test_accessors() {
        let state = overlay_state();
        assert_eq!(state.kind(), LayerKind::Overlay);
        assert_eq!(state.name(), "cat");
        assert!(state.is_enabled());
        assert!(state.has_raster());
    }
}
