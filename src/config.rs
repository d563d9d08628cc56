//! Engine configuration
//!
//! Every field has a default, so a partial JSON document is enough to
//! override a single setting.

use serde::{Deserialize, Serialize};

use crate::engine::Color;
use crate::error::{LayerError, Result};
use crate::markers::MarkerShape;

/// Default maximum number of undo points kept.
pub const DEFAULT_MAX_UNDO: usize = 20;

/// Default opacity of newly imported annotation layers.
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Default factor applied by zoom in/out.
pub const DEFAULT_ZOOM_STEP: f64 = 1.4;

/// Default half-size of a marker shape in image pixels.
pub const DEFAULT_MARKER_EXTENT: u32 = 5;

/// Settings for the transient marker path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub shape: MarkerShape,
    pub color: Color,
    pub extent: u32,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            shape: MarkerShape::Box,
            color: Color::RED,
            extent: DEFAULT_MARKER_EXTENT,
        }
    }
}

/// Configuration for a [`LayerManager`](crate::layers::LayerManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Start in split mode (one overlay per class) rather than combined mode
    pub split_layers: bool,

    /// Whether undo points are recorded at all
    pub undo_enabled: bool,

    /// Maximum undo depth, `None` for unlimited
    pub max_undo: Option<usize>,

    /// Fill color of the background layer
    pub background_color: Color,

    /// Opacity used for annotation layers created by import
    pub default_alpha: f32,

    /// Factor used by zoom in/out
    pub zoom_step: f64,

    pub marker: MarkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            split_layers: true,
            undo_enabled: true,
            max_undo: Some(DEFAULT_MAX_UNDO),
            background_color: Color::WHITE,
            default_alpha: DEFAULT_ALPHA,
            zoom_step: DEFAULT_ZOOM_STEP,
            marker: MarkerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is within its accepted range
    pub fn validate(&self) -> Result<()> {
        if self.max_undo == Some(0) {
            return Err(LayerError::invalid(
                "max_undo",
                "must be greater than 0, or null for unlimited",
            ));
        }
        if !(0.0..=1.0).contains(&self.default_alpha) {
            return Err(LayerError::invalid(
                "default_alpha",
                format!("{} is outside [0, 1]", self.default_alpha),
            ));
        }
        if self.zoom_step.is_nan() || self.zoom_step <= 1.0 {
            return Err(LayerError::invalid(
                "zoom_step",
                format!("{} must be greater than 1", self.zoom_step),
            ));
        }
        Ok(())
    }
}
