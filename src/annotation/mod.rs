//! Annotation import/export
//!
//! Moves per-class masks between a [`SegmentationData`] bundle and the
//! layer stack. Layer settings the user picked during one session carry
//! over to the next import through an explicit [`AnnotationContext`]
//! instead of any global cache.

mod colors;

use std::collections::HashMap;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use colors::{ColorProvider, DEFAULT_PALETTE};

use crate::config::{EngineConfig, DEFAULT_ALPHA};
use crate::error::Result;
use crate::layers::{AnnotationMode, Layer, LayerKind, LayerManager, LayerState};

/// A base image plus one foreground/background mask per label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentationData {
    pub base: Option<RgbaImage>,
    pub layers: HashMap<String, RgbaImage>,
}

impl SegmentationData {
    pub fn new(base: RgbaImage) -> Self {
        Self {
            base: Some(base),
            layers: HashMap::new(),
        }
    }

    pub fn with_layer(mut self, label: impl Into<String>, mask: RgbaImage) -> Self {
        self.layers.insert(label.into(), mask);
        self
    }
}

/// Which annotation layers are shown after an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerVisibility {
    #[default]
    All,
    None,
    /// Whatever the previous session's settings said
    PreviouslyVisible,
}

/// How labels become layers on import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub split_layers: bool,
    pub alpha: f32,
    /// Split mode only
    pub removable: bool,
    /// Split mode only
    pub actions_available: bool,
    pub visibility: LayerVisibility,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            split_layers: true,
            alpha: DEFAULT_ALPHA,
            removable: false,
            actions_available: false,
            visibility: LayerVisibility::All,
        }
    }
}

impl ImportOptions {
    /// Mode and alpha taken from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            split_layers: config.split_layers,
            alpha: config.default_alpha,
            ..Self::default()
        }
    }
}

/// State carried from one import/export round to the next
#[derive(Debug, Clone, Default)]
pub struct AnnotationContext {
    colors: ColorProvider,
    last_settings: Vec<LayerState>,
}

impl AnnotationContext {
    pub fn new(colors: ColorProvider) -> Self {
        Self {
            colors,
            last_settings: Vec::new(),
        }
    }

    pub fn colors(&self) -> &ColorProvider {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut ColorProvider {
        &mut self.colors
    }

    /// Settings recorded by the last export
    pub fn last_settings(&self) -> &[LayerState] {
        &self.last_settings
    }

    pub fn set_last_settings(&mut self, settings: Vec<LayerState>) {
        self.last_settings = settings;
    }

    pub fn forget_settings(&mut self) {
        self.last_settings.clear();
    }
}

/// Rebuild the layer stack from `data`.
///
/// The manager is cleared and switched to the requested mode, then one
/// layer is added per label in order. A label without a mask gets an
/// empty one. Settings from the previous export are re-applied before the
/// visibility option is enforced. Everything happens in one update batch.
pub fn import_annotations<S: AsRef<str>>(
    manager: &mut LayerManager,
    data: &SegmentationData,
    labels: &[S],
    options: &ImportOptions,
    context: &mut AnnotationContext,
) -> Result<()> {
    manager.update(|manager| -> Result<()> {
        context.colors.reset();
        manager.set_split_layers(options.split_layers);
        if let Some(base) = &data.base {
            manager.set_image(Some(base.clone()));
        }

        for label in labels {
            let label = label.as_ref();
            let color = context.colors.next_color();
            let mask = data.layers.get(label);
            if mask.is_none() && !data.layers.is_empty() {
                warn!(label, "label not present in layers, using empty layer");
            }
            if options.split_layers {
                let overlay = manager.add_overlay(label, color, options.alpha, mask)?;
                overlay.set_removable(options.removable);
                overlay.set_actions_available(options.actions_available);
            } else {
                manager.add_combined(label, color, options.alpha, mask)?;
            }
        }

        if !context.last_settings.is_empty() {
            let applied = manager.set_settings(&context.last_settings);
            debug!(applied, "re-applied previous settings");
        }

        let forced = match options.visibility {
            LayerVisibility::All => Some(true),
            LayerVisibility::None => Some(false),
            LayerVisibility::PreviouslyVisible => None,
        };
        if let Some(enabled) = forced {
            let names: Vec<String> = manager
                .layers()
                .iter()
                .filter(|l| matches!(l.kind(), LayerKind::Overlay | LayerKind::Combined))
                .map(|l| l.name().to_string())
                .collect();
            for name in names {
                manager.set_layer_enabled(&name, enabled)?;
            }
        }

        info!(labels = labels.len(), mode = %manager.mode(), "imported annotations");
        Ok(())
    })
}

/// Extract one white/black mask per label plus the base image.
///
/// The current settings are remembered in `context` for the next import.
pub fn export_annotations(manager: &LayerManager, context: &mut AnnotationContext) -> SegmentationData {
    let layers: HashMap<String, RgbaImage> = match manager.mode() {
        AnnotationMode::Split => manager
            .overlays()
            .iter()
            .map(|o| (o.name().to_string(), o.binary_mask()))
            .collect(),
        AnnotationMode::Combined => manager
            .combined()
            .map(|c| {
                c.sub_layers()
                    .iter()
                    .filter_map(|s| c.binary_mask(s.name()).map(|m| (s.name().to_string(), m)))
                    .collect()
            })
            .unwrap_or_default(),
    };

    context.last_settings = manager.settings();
    debug!(layers = layers.len(), "exported annotations");
    SegmentationData {
        base: manager.image_layer().image().cloned(),
        layers,
    }
}
