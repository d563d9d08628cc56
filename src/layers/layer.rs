//! Behaviour shared by all layer variants

use std::fmt;

use serde::{Deserialize, Serialize};

use super::background::BackgroundLayer;
use super::combined::CombinedLayer;
use super::image::ImageLayer;
use super::overlay::OverlayLayer;
use super::state::LayerState;
use crate::engine::DrawContext;

/// The four layer variants, in draw order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Background,
    Image,
    Overlay,
    Combined,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Background => write!(f, "Background"),
            LayerKind::Image => write!(f, "Image"),
            LayerKind::Overlay => write!(f, "Overlay"),
            LayerKind::Combined => write!(f, "Combined"),
        }
    }
}

/// Name, visibility and capability flags common to every layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub enabled: bool,
    pub removable: bool,
    pub has_actions: bool,
}

impl LayerInfo {
    /// A visible layer that can neither be removed nor offers actions
    pub fn fixed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            removable: false,
            has_actions: false,
        }
    }
}

/// Common layer interface.
///
/// `state` includes the raster, `settings` only the parameters. Restoring
/// a state of another variant is refused and leaves the layer untouched.
pub trait Layer {
    fn info(&self) -> &LayerInfo;

    fn info_mut(&mut self) -> &mut LayerInfo;

    fn kind(&self) -> LayerKind;

    /// Render into the context; called only for enabled layers
    fn draw(&mut self, ctx: &mut DrawContext<'_>);

    /// Parameters plus a deep copy of the raster
    fn state(&self) -> LayerState;

    /// Parameters only
    fn settings(&self) -> LayerState;

    /// Restore from a state; returns false on a variant mismatch
    fn set_state(&mut self, state: LayerState) -> bool;

    /// Restore parameters only; returns false on a variant mismatch
    fn set_settings(&mut self, settings: &LayerState) -> bool;

    /// Whether some pending parameter differs from the applied one
    fn has_pending_changes(&self) -> bool {
        false
    }

    /// Commit pending parameters; returns whether anything changed
    fn apply(&mut self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.info().name
    }

    fn is_enabled(&self) -> bool {
        self.info().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.info_mut().enabled = enabled;
    }

    fn is_removable(&self) -> bool {
        self.info().removable
    }

    fn has_actions(&self) -> bool {
        self.info().has_actions
    }
}

/// Borrowed view of one layer in the stack
#[derive(Debug, Clone, Copy)]
pub enum LayerRef<'a> {
    Background(&'a BackgroundLayer),
    Image(&'a ImageLayer),
    Overlay(&'a OverlayLayer),
    Combined(&'a CombinedLayer),
}

impl<'a> LayerRef<'a> {
    pub fn as_layer(&self) -> &'a dyn Layer {
        match *self {
            LayerRef::Background(l) => l,
            LayerRef::Image(l) => l,
            LayerRef::Overlay(l) => l,
            LayerRef::Combined(l) => l,
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.as_layer().kind()
    }

    pub fn name(&self) -> &'a str {
        match *self {
            LayerRef::Background(l) => l.name(),
            LayerRef::Image(l) => l.name(),
            LayerRef::Overlay(l) => l.name(),
            LayerRef::Combined(l) => l.name(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.as_layer().is_enabled()
    }
}
