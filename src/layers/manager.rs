//! Layer Manager
//!
//! Owns the fixed layers (background and base image), the annotation
//! layers of the current mode, the zoom, the markers and the undo history.
//!
//! Annotation mode is exclusive. Split mode holds a list of overlays,
//! combined mode at most one combined layer; calling an operation of the
//! other mode is a usage error. Switching mode discards every annotation
//! layer and the undo history.

use std::collections::HashSet;
use std::fmt;

use chrono::Utc;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::background::BackgroundLayer;
use super::combined::{CombinedLayer, CombinedSubLayer, COMBINED_LAYER_NAME};
use super::image::ImageLayer;
use super::layer::{Layer, LayerRef};
use super::overlay::{check_alpha, OverlayLayer};
use super::state::LayerState;
use crate::config::EngineConfig;
use crate::engine::{init_mask, new_mask, Color, DrawContext, Surface, Viewport};
use crate::error::{LayerError, Result};
use crate::markers::{MarkerShape, Markers};
use crate::state::{ChangeNotifier, ListenerId, UndoManager};

/// Smallest zoom reachable by zooming out
const MIN_ZOOM: f64 = 0.001;

/// Which annotation layers are valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    /// One overlay per class
    Split,
    /// One shared raster for all classes
    Combined,
}

impl fmt::Display for AnnotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationMode::Split => write!(f, "split"),
            AnnotationMode::Combined => write!(f, "combined"),
        }
    }
}

/// What changed; every event asks the host to repaint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Layers,
    Zoom,
    Markers,
    Restored,
}

/// Fired once a deferred best-fit has finally been computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestFitEvent {
    pub zoom: f64,
}

#[derive(Debug)]
enum Annotations {
    Split(Vec<OverlayLayer>),
    Combined(Option<CombinedLayer>),
}

impl Annotations {
    fn empty(mode: AnnotationMode) -> Self {
        match mode {
            AnnotationMode::Split => Annotations::Split(Vec::new()),
            AnnotationMode::Combined => Annotations::Combined(None),
        }
    }

    fn mode(&self) -> AnnotationMode {
        match self {
            Annotations::Split(_) => AnnotationMode::Split,
            Annotations::Combined(_) => AnnotationMode::Combined,
        }
    }
}

/// Snapshot type kept on the undo stacks
pub type LayerSnapshot = Vec<LayerState>;

/// Top-level owner of the layer stack
#[derive(Debug)]
pub struct LayerManager {
    config: EngineConfig,
    background: BackgroundLayer,
    image: ImageLayer,
    annotations: Annotations,
    zoom: f64,
    best_fit_pending: bool,
    markers: Markers,
    undo: UndoManager<LayerSnapshot>,
    changes: ChangeNotifier<ChangeEvent>,
    best_fit: ChangeNotifier<BestFitEvent>,
}

impl Default for LayerManager {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl LayerManager {
    /// Create a manager after validating `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let mode = if config.split_layers {
            AnnotationMode::Split
        } else {
            AnnotationMode::Combined
        };
        let mut undo = UndoManager::new(config.max_undo);
        undo.set_enabled(config.undo_enabled);

        Self {
            background: BackgroundLayer::new(config.background_color),
            image: ImageLayer::new(),
            annotations: Annotations::empty(mode),
            zoom: 1.0,
            best_fit_pending: false,
            markers: Markers::new(&config.marker),
            undo,
            changes: ChangeNotifier::new(),
            best_fit: ChangeNotifier::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn notify(&mut self, event: ChangeEvent) {
        self.changes.notify(&event);
    }

    fn overlays_vec_mut(&mut self, operation: &'static str) -> Result<&mut Vec<OverlayLayer>> {
        match &mut self.annotations {
            Annotations::Split(overlays) => Ok(overlays),
            Annotations::Combined(_) => Err(LayerError::WrongMode {
                operation,
                required: AnnotationMode::Split,
                actual: AnnotationMode::Combined,
            }),
        }
    }

    fn combined_slot_mut(&mut self, operation: &'static str) -> Result<&mut Option<CombinedLayer>> {
        match &mut self.annotations {
            Annotations::Combined(slot) => Ok(slot),
            Annotations::Split(_) => Err(LayerError::WrongMode {
                operation,
                required: AnnotationMode::Combined,
                actual: AnnotationMode::Split,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Base image and fixed layers
    // ------------------------------------------------------------------

    /// Install the base image; `None` is ignored and returns false
    pub fn set_image(&mut self, image: Option<RgbaImage>) -> bool {
        let Some(image) = image else {
            debug!("no image given, keeping the current one");
            return false;
        };
        info!(width = image.width(), height = image.height(), "base image set");
        self.image.set_image(Some(image));
        self.notify(ChangeEvent::Layers);
        true
    }

    /// Width of the base image, 0 before one is set
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height of the base image, 0 before one is set
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn background(&self) -> &BackgroundLayer {
        &self.background
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.background.set_color(color);
        self.notify(ChangeEvent::Layers);
    }

    pub fn image_layer(&self) -> &ImageLayer {
        &self.image
    }

    /// Stage a brightness change on the base image
    pub fn set_brightness(&mut self, percent: f32) -> Result<()> {
        self.image.set_brightness(percent)
    }

    /// Commit the staged brightness
    pub fn apply_image(&mut self) -> bool {
        let changed = self.image.apply();
        if changed {
            debug!(brightness = self.image.brightness_applied(), "applied brightness");
            self.notify(ChangeEvent::Layers);
        }
        changed
    }

    /// All layers in draw order
    pub fn layers(&self) -> Vec<LayerRef<'_>> {
        let mut layers = vec![LayerRef::Background(&self.background), LayerRef::Image(&self.image)];
        match &self.annotations {
            Annotations::Split(overlays) => layers.extend(overlays.iter().map(LayerRef::Overlay)),
            Annotations::Combined(Some(combined)) => layers.push(LayerRef::Combined(combined)),
            Annotations::Combined(None) => {}
        }
        layers
    }

    /// Show or hide any layer by name
    pub fn set_layer_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let layer: &mut dyn Layer = if self.background.name() == name {
            &mut self.background
        } else if self.image.name() == name {
            &mut self.image
        } else {
            match &mut self.annotations {
                Annotations::Split(overlays) => match overlays.iter_mut().find(|o| o.name() == name) {
                    Some(overlay) => overlay,
                    None => return Err(LayerError::LayerNotFound { name: name.to_string() }),
                },
                Annotations::Combined(Some(combined)) if combined.name() == name => combined,
                Annotations::Combined(_) => {
                    return Err(LayerError::LayerNotFound { name: name.to_string() })
                }
            }
        };
        layer.set_enabled(enabled);
        debug!(layer = %name, enabled, "layer visibility changed");
        self.notify(ChangeEvent::Layers);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Annotation mode
    // ------------------------------------------------------------------

    pub fn mode(&self) -> AnnotationMode {
        self.annotations.mode()
    }

    pub fn is_split_layers(&self) -> bool {
        self.mode() == AnnotationMode::Split
    }

    /// Switch annotation mode.
    ///
    /// Always clears annotations and undo history, even if the mode does
    /// not change.
    pub fn set_split_layers(&mut self, split: bool) {
        let mode = if split {
            AnnotationMode::Split
        } else {
            AnnotationMode::Combined
        };
        info!(from = %self.mode(), to = %mode, "switching annotation mode");
        self.config.split_layers = split;
        self.annotations = Annotations::empty(mode);
        self.clear();
    }

    /// Drop all annotation layers, markers and undo history.
    ///
    /// The base image and background are kept.
    pub fn clear(&mut self) {
        self.annotations = Annotations::empty(self.mode());
        self.undo.clear();
        self.markers.clear();
        debug!(mode = %self.mode(), "cleared annotations");
        self.notify(ChangeEvent::Layers);
    }

    // ------------------------------------------------------------------
    // Split mode
    // ------------------------------------------------------------------

    /// Add an overlay.
    ///
    /// `raster` may be any foreground/background mask and is keyed with
    /// `color`. Without one an empty mask of the base image size is used.
    /// The first overlay becomes active.
    pub fn add_overlay(
        &mut self,
        name: impl Into<String>,
        color: Color,
        alpha: f32,
        raster: Option<&RgbaImage>,
    ) -> Result<&mut OverlayLayer> {
        let name = name.into();
        let (width, height) = (self.width(), self.height());
        let overlays = self.overlays_vec_mut("add_overlay")?;
        let alpha = check_alpha(alpha)?;
        if overlays.iter().any(|o| o.name() == name) {
            return Err(LayerError::DuplicateLayer { name });
        }

        let mask = match raster {
            Some(raster) => init_mask(raster, color),
            None => new_mask(width, height),
        };
        let mut overlay = OverlayLayer::new(name.clone(), color, alpha, mask);
        if !overlays.iter().any(|o| o.is_active()) {
            overlay.set_active(true);
        }
        overlays.push(overlay);
        let index = overlays.len() - 1;

        debug!(layer = %name, %color, alpha, "added overlay");
        self.notify(ChangeEvent::Layers);
        Ok(&mut self.overlays_vec_mut("add_overlay")?[index])
    }

    /// Remove an overlay by name.
    ///
    /// If it was active, the first remaining overlay takes over.
    pub fn remove_overlay(&mut self, name: &str) -> Result<Option<OverlayLayer>> {
        let overlays = self.overlays_vec_mut("remove_overlay")?;
        let Some(index) = overlays.iter().position(|o| o.name() == name) else {
            return Ok(None);
        };
        let removed = overlays.remove(index);
        if removed.is_active() {
            if let Some(first) = overlays.first_mut() {
                first.set_active(true);
                debug!(layer = %first.name(), "promoted overlay to active");
            }
        }

        debug!(layer = %name, "removed overlay");
        self.notify(ChangeEvent::Layers);
        Ok(Some(removed))
    }

    /// Overlays in draw order; empty in combined mode
    pub fn overlays(&self) -> &[OverlayLayer] {
        match &self.annotations {
            Annotations::Split(overlays) => overlays,
            Annotations::Combined(_) => &[],
        }
    }

    pub fn overlay(&self, name: &str) -> Option<&OverlayLayer> {
        self.overlays().iter().find(|o| o.name() == name)
    }

    pub fn overlay_mut(&mut self, name: &str) -> Option<&mut OverlayLayer> {
        match &mut self.annotations {
            Annotations::Split(overlays) => overlays.iter_mut().find(|o| o.name() == name),
            Annotations::Combined(_) => None,
        }
    }

    pub fn active_overlay(&self) -> Option<&OverlayLayer> {
        self.overlays().iter().find(|o| o.is_active())
    }

    /// Make `name` the only active overlay
    pub fn activate_overlay(&mut self, name: &str) -> Result<()> {
        let overlays = self.overlays_vec_mut("activate_overlay")?;
        if !overlays.iter().any(|o| o.name() == name) {
            return Err(LayerError::LayerNotFound { name: name.to_string() });
        }
        for overlay in overlays.iter_mut() {
            overlay.set_active(overlay.name() == name);
        }
        self.notify(ChangeEvent::Layers);
        Ok(())
    }

    /// Commit an overlay's staged color and alpha
    pub fn apply_overlay(&mut self, name: &str) -> Result<bool> {
        let overlay = self
            .overlay_mut(name)
            .ok_or_else(|| LayerError::LayerNotFound { name: name.to_string() })?;
        let changed = overlay.apply();
        if changed {
            self.notify(ChangeEvent::Layers);
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Combined mode
    // ------------------------------------------------------------------

    /// Add a class to the combined layer, creating it on first use
    pub fn add_combined(
        &mut self,
        name: impl Into<String>,
        color: Color,
        alpha: f32,
        raster: Option<&RgbaImage>,
    ) -> Result<&mut CombinedSubLayer> {
        let name = name.into();
        let (width, height) = (self.width(), self.height());
        let combined = self
            .combined_slot_mut("add_combined")?
            .get_or_insert_with(CombinedLayer::new);
        combined.add(name.clone(), color, alpha, raster, width, height)?;

        debug!(sub_layer = %name, %color, alpha, "added combined sub-layer");
        self.notify(ChangeEvent::Layers);
        self.combined_mut()
            .and_then(|c| c.sub_layer_mut(&name))
            .ok_or_else(|| LayerError::LayerNotFound { name })
    }

    /// The combined layer, once a sub-layer was added
    pub fn combined(&self) -> Option<&CombinedLayer> {
        match &self.annotations {
            Annotations::Combined(slot) => slot.as_ref(),
            Annotations::Split(_) => None,
        }
    }

    pub fn combined_mut(&mut self) -> Option<&mut CombinedLayer> {
        match &mut self.annotations {
            Annotations::Combined(slot) => slot.as_mut(),
            Annotations::Split(_) => None,
        }
    }

    /// Commit the combined layer's overall alpha and every staged
    /// sub-layer edit
    pub fn apply_combined(&mut self) -> Result<bool> {
        let combined = self
            .combined_slot_mut("apply_combined")?
            .as_mut()
            .ok_or_else(|| LayerError::LayerNotFound {
                name: COMBINED_LAYER_NAME.to_string(),
            })?;
        let changed = combined.apply();
        if changed {
            self.notify(ChangeEvent::Layers);
        }
        Ok(changed)
    }

    /// Commit one sub-layer; returns the number of recolored pixels
    pub fn apply_sub_layer(&mut self, name: &str) -> Result<usize> {
        let combined = self
            .combined_slot_mut("apply_sub_layer")?
            .as_mut()
            .ok_or_else(|| LayerError::LayerNotFound { name: name.to_string() })?;
        let replaced = combined.apply_sub_layer(name)?;
        self.notify(ChangeEvent::Layers);
        Ok(replaced)
    }

    // ------------------------------------------------------------------
    // Zoom and drawing
    // ------------------------------------------------------------------

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(LayerError::invalid("zoom", format!("{} must be positive", zoom)));
        }
        debug!(zoom, "zoom set");
        self.zoom = zoom;
        self.notify(ChangeEvent::Zoom);
        Ok(())
    }

    /// Back to 1:1
    pub fn clear_zoom(&mut self) {
        self.zoom = 1.0;
        self.notify(ChangeEvent::Zoom);
    }

    pub fn zoom_in(&mut self) {
        self.zoom = round_zoom(self.zoom * self.config.zoom_step);
        debug!(zoom = self.zoom, "zoomed in");
        self.notify(ChangeEvent::Zoom);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = round_zoom(self.zoom / self.config.zoom_step);
        debug!(zoom = self.zoom, "zoomed out");
        self.notify(ChangeEvent::Zoom);
    }

    pub fn is_best_fit_pending(&self) -> bool {
        self.best_fit_pending
    }

    /// Zoom so the base image fits the viewport.
    ///
    /// A viewport that is not laid out yet defers the fit to the next
    /// draw. A fit that completes after being deferred fires a
    /// [`BestFitEvent`]. Returns whether the zoom was computed.
    pub fn best_fit_zoom<V: Viewport + ?Sized>(&mut self, viewport: &V) -> bool {
        let (width, height) = (self.width(), self.height());
        if width == 0 || height == 0 {
            self.best_fit_pending = false;
            return false;
        }
        let (view_width, view_height) = viewport.viewport_size();
        if view_width == 0 || view_height == 0 {
            debug!("viewport not laid out yet, deferring best fit");
            self.best_fit_pending = true;
            return false;
        }

        let zoom = (view_width as f64 / width as f64).min(view_height as f64 / height as f64);
        debug!(zoom, view_width, view_height, "best fit");
        self.zoom = zoom;
        self.notify(ChangeEvent::Zoom);
        if std::mem::take(&mut self.best_fit_pending) {
            self.best_fit.notify(&BestFitEvent { zoom });
        }
        true
    }

    /// Render one frame.
    ///
    /// A pending best-fit is done instead of drawing. Returns whether
    /// anything was drawn.
    pub fn draw<S: Surface + ?Sized>(&mut self, surface: &mut S) -> bool {
        if self.best_fit_pending {
            self.best_fit_zoom(surface);
            return false;
        }

        let mut ctx = DrawContext::new(surface.canvas_mut(), self.zoom);
        if self.background.is_enabled() {
            self.background.draw(&mut ctx);
        }
        if self.image.is_enabled() {
            self.image.draw(&mut ctx);
        }
        match &mut self.annotations {
            Annotations::Split(overlays) => {
                for overlay in overlays.iter_mut().filter(|o| o.is_enabled()) {
                    overlay.draw(&mut ctx);
                }
            }
            Annotations::Combined(Some(combined)) if combined.is_enabled() => {
                combined.draw(&mut ctx);
            }
            Annotations::Combined(_) => {}
        }
        self.markers.draw(&mut ctx);
        true
    }

    // ------------------------------------------------------------------
    // Update batching and notifications
    // ------------------------------------------------------------------

    /// Suppress change notifications until [`finish_update`](Self::finish_update)
    pub fn start_update(&mut self) {
        self.changes.suppress();
    }

    /// Resume notifications, optionally firing one for the whole batch
    pub fn finish_update(&mut self, notify: bool) {
        self.changes.resume();
        if notify {
            self.notify(ChangeEvent::Layers);
        }
    }

    pub fn is_updating(&self) -> bool {
        self.changes.is_suppressed()
    }

    /// Run `f` as one batch. Nested batches notify once, at the outermost.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let nested = self.is_updating();
        self.start_update();
        let result = f(self);
        if !nested {
            self.finish_update(true);
        }
        result
    }

    pub fn subscribe_changes(&mut self, listener: impl FnMut(&ChangeEvent) + 'static) -> ListenerId {
        self.changes.subscribe(listener)
    }

    pub fn unsubscribe_changes(&mut self, id: ListenerId) -> bool {
        self.changes.unsubscribe(id)
    }

    pub fn subscribe_best_fit(&mut self, listener: impl FnMut(&BestFitEvent) + 'static) -> ListenerId {
        self.best_fit.subscribe(listener)
    }

    pub fn unsubscribe_best_fit(&mut self, id: ListenerId) -> bool {
        self.best_fit.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Append a marker point in image coordinates
    pub fn add_marker(&mut self, x: f64, y: f64) {
        if self.markers.add(x, y) {
            self.notify(ChangeEvent::Markers);
        }
    }

    /// Drop all marker points; always repaints to erase old shapes
    pub fn clear_markers(&mut self) {
        self.markers.clear();
        self.notify(ChangeEvent::Markers);
    }

    pub fn set_marker_shape(&mut self, shape: MarkerShape) {
        self.markers.set_shape(shape);
        self.notify(ChangeEvent::Markers);
    }

    pub fn set_marker_color(&mut self, color: Color) {
        self.markers.set_color(color);
        self.notify(ChangeEvent::Markers);
    }

    pub fn set_marker_extent(&mut self, extent: u32) {
        self.markers.set_extent(extent);
        self.notify(ChangeEvent::Markers);
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    pub fn is_undo_supported(&self) -> bool {
        self.undo.is_enabled()
    }

    pub fn set_undo_enabled(&mut self, enabled: bool) {
        self.config.undo_enabled = enabled;
        self.undo.set_enabled(enabled);
    }

    pub fn undo_manager(&self) -> &UndoManager<LayerSnapshot> {
        &self.undo
    }

    /// Mutable access, e.g. to register listeners or change the depth
    pub fn undo_manager_mut(&mut self) -> &mut UndoManager<LayerSnapshot> {
        &mut self.undo
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Snapshot every layer; an empty comment becomes the current time
    pub fn add_undo_point(&mut self, comment: &str) -> bool {
        if !self.is_undo_supported() {
            return false;
        }
        let comment = if comment.is_empty() {
            Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            comment.to_string()
        };
        let snapshot = self.state();
        let added = self.undo.add_undo(snapshot, comment.as_str());
        debug!(comment = %comment, undo = self.undo.undo_count(), "added undo point");
        added
    }

    /// Restore the last undo point, keeping the current state for redo
    pub fn undo(&mut self) -> bool {
        let Some(point) = self.undo.undo() else {
            return false;
        };
        let current = self.state();
        self.undo.add_redo(current, point.comment.as_str());
        info!(comment = %point.comment, "undo");
        self.restore(point.data);
        true
    }

    /// Re-apply the last undone state
    pub fn redo(&mut self) -> bool {
        let Some(point) = self.undo.redo() else {
            return false;
        };
        let current = self.state();
        self.undo.add_undo_with(current, point.comment.as_str(), true);
        info!(comment = %point.comment, "redo");
        self.restore(point.data);
        true
    }

    fn restore(&mut self, snapshot: LayerSnapshot) {
        self.prune_to(&snapshot);
        self.update(|manager| {
            for state in snapshot {
                manager.restore_layer(state);
            }
            manager.normalize_active();
        });
        self.notify(ChangeEvent::Restored);
    }

    /// Drop annotation layers the snapshot does not know about
    fn prune_to(&mut self, snapshot: &[LayerState]) {
        match &mut self.annotations {
            Annotations::Split(overlays) => {
                let names: HashSet<&str> = snapshot
                    .iter()
                    .filter_map(|s| match s {
                        LayerState::Overlay(o) => Some(o.name.as_str()),
                        _ => None,
                    })
                    .collect();
                overlays.retain(|o| names.contains(o.name()));
            }
            Annotations::Combined(slot) => {
                let saved = snapshot.iter().find_map(|s| match s {
                    LayerState::Combined(c) => Some(c),
                    _ => None,
                });
                match saved {
                    Some(saved) => {
                        if let Some(combined) = slot.as_mut() {
                            combined.retain_sub_layers(&saved.order);
                        }
                    }
                    None => *slot = None,
                }
            }
        }
    }

    fn restore_layer(&mut self, state: LayerState) -> bool {
        let (width, height) = (self.width(), self.height());
        let kind = state.kind();
        let name = state.name().to_string();
        let restored = match state {
            s @ LayerState::Background(_) => self.background.set_state(s),
            s @ LayerState::Image(_) => self.image.set_state(s),
            LayerState::Overlay(s) => match &mut self.annotations {
                Annotations::Split(overlays) => match overlays.iter_mut().find(|o| o.name() == s.name) {
                    Some(overlay) => overlay.set_state(LayerState::Overlay(s)),
                    None => {
                        debug!(layer = %s.name, "re-creating overlay from state");
                        overlays.push(OverlayLayer::from_state(s, width, height));
                        true
                    }
                },
                Annotations::Combined(_) => false,
            },
            s @ LayerState::Combined(_) => match &mut self.annotations {
                Annotations::Combined(slot) => slot.get_or_insert_with(CombinedLayer::new).set_state(s),
                Annotations::Split(_) => false,
            },
        };
        if !restored {
            warn!(layer = %name, %kind, mode = %self.mode(), "skipping state that does not fit the layer stack");
        }
        restored
    }

    /// Keep exactly one active overlay while any exist
    fn normalize_active(&mut self) {
        let Annotations::Split(overlays) = &mut self.annotations else {
            return;
        };
        let mut seen = false;
        for overlay in overlays.iter_mut() {
            if overlay.is_active() {
                if seen {
                    overlay.set_active(false);
                }
                seen = true;
            }
        }
        if !seen {
            if let Some(first) = overlays.first_mut() {
                first.set_active(true);
            }
        }
    }

    // ------------------------------------------------------------------
    // State and settings
    // ------------------------------------------------------------------

    /// Full state of every layer, rasters included
    pub fn state(&self) -> LayerSnapshot {
        self.layers().iter().map(|l| l.as_layer().state()).collect()
    }

    /// Restore layers from states.
    ///
    /// Overlays missing from the stack are re-created; states that do not
    /// fit the current mode are skipped. Returns the number restored.
    pub fn set_state(&mut self, states: LayerSnapshot) -> usize {
        self.update(|manager| {
            let mut restored = 0;
            for state in states {
                if manager.restore_layer(state) {
                    restored += 1;
                }
            }
            manager.normalize_active();
            restored
        })
    }

    /// Parameters of every layer, without rasters
    pub fn settings(&self) -> LayerSnapshot {
        self.layers().iter().map(|l| l.as_layer().settings()).collect()
    }

    /// Apply parameters to existing layers matched by name.
    ///
    /// Returns the number of entries applied; the rest are skipped.
    pub fn set_settings(&mut self, settings: &[LayerState]) -> usize {
        let mut applied = 0;
        for s in settings {
            let ok = match s {
                LayerState::Background(_) => self.background.set_settings(s),
                LayerState::Image(_) => self.image.set_settings(s),
                LayerState::Overlay(o) => self.overlay_mut(&o.name).map_or(false, |l| l.set_settings(s)),
                LayerState::Combined(_) => self.combined_mut().map_or(false, |c| c.set_settings(s)),
            };
            if ok {
                applied += 1;
            } else {
                warn!(layer = %s.name(), kind = %s.kind(), "no matching layer for settings");
            }
        }
        self.normalize_active();
        self.notify(ChangeEvent::Layers);
        applied
    }

    pub fn settings_to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.settings())?)
    }

    pub fn settings_from_json(&mut self, json: &str) -> Result<usize> {
        let settings: LayerSnapshot = serde_json::from_str(json)?;
        Ok(self.set_settings(&settings))
    }
}

fn round_zoom(zoom: f64) -> f64 {
    ((zoom * 1000.0).round() / 1000.0).max(MIN_ZOOM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FixedViewport, RasterSurface};
    use image::Rgba;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn manager_with_image(width: u32, height: u32) -> LayerManager {
        let mut manager = LayerManager::default();
        manager.set_image(Some(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))));
        manager
    }

    fn square_mask(size: u32, x: u32, y: u32) -> RgbaImage {
        let mut mask = RgbaImage::new(size, size);
        mask.put_pixel(x, y, Rgba([255, 255, 255, 255]));
        mask
    }

    fn record_changes(manager: &mut LayerManager) -> Rc<RefCell<Vec<ChangeEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        manager.subscribe_changes(move |e| sink.borrow_mut().push(*e));
        events
    }

    #[test]
    fn test_split_scenario() {
        let mut manager = manager_with_image(4, 4);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        manager.add_overlay("B", Color::BLUE, 0.5, None).unwrap();
        assert_eq!(manager.active_overlay().unwrap().name(), "A");

        manager.remove_overlay("A").unwrap();
        assert_eq!(manager.active_overlay().unwrap().name(), "B");

        manager.add_undo_point("before switch");
        manager.set_split_layers(false);
        assert!(manager.overlays().is_empty());
        assert!(!manager.can_undo());
        assert_eq!(manager.mode(), AnnotationMode::Combined);
    }

    #[test]
    fn test_wrong_mode_is_usage_error() {
        let mut manager = manager_with_image(4, 4);
        let err = manager.add_combined("x", Color::RED, 0.5, None).unwrap_err();
        assert!(err.is_usage_error());

        manager.set_split_layers(false);
        assert!(manager.add_overlay("x", Color::RED, 0.5, None).is_err());
        assert!(manager.remove_overlay("x").is_err());
    }

    #[test]
    fn test_empty_overlay_has_image_size() {
        let mut manager = manager_with_image(6, 3);
        let overlay = manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        assert_eq!(overlay.image().dimensions(), (6, 3));
    }

    #[test]
    fn test_duplicate_overlay() {
        let mut manager = manager_with_image(2, 2);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        let err = manager.add_overlay("A", Color::BLUE, 0.5, None).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_LAYER");
    }

    #[test]
    fn test_set_image_none_is_noop() {
        let mut manager = LayerManager::default();
        assert!(!manager.set_image(None));
        assert_eq!((manager.width(), manager.height()), (0, 0));
    }

    #[test]
    fn test_best_fit() {
        let mut manager = manager_with_image(800, 600);
        assert!(manager.best_fit_zoom(&FixedViewport::new(400, 300)));
        assert_eq!(manager.zoom(), 0.5);
        assert!(manager.best_fit_zoom(&FixedViewport::new(400, 600)));
        assert_eq!(manager.zoom(), 0.5);
    }

    #[test]
    fn test_deferred_best_fit_runs_on_next_draw() {
        let mut manager = manager_with_image(800, 600);
        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fired);
        manager.subscribe_best_fit(move |e| sink.borrow_mut().push(e.zoom));

        assert!(!manager.best_fit_zoom(&FixedViewport::new(0, 300)));
        assert!(manager.is_best_fit_pending());

        let mut surface = RasterSurface::new(200, 150);
        assert!(!manager.draw(&mut surface));
        assert!(!manager.is_best_fit_pending());
        assert_eq!(manager.zoom(), 0.25);
        assert_eq!(*fired.borrow(), vec![0.25]);
        assert!(manager.draw(&mut surface));
    }

    #[test]
    fn test_draw_order() {
        let mut manager = manager_with_image(2, 2);
        manager
            .add_overlay("A", Color::RED, 1.0, Some(&square_mask(2, 0, 0)))
            .unwrap();
        let mut surface = RasterSurface::new(2, 2);
        assert!(manager.draw(&mut surface));

        assert_eq!(*surface.canvas().get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*surface.canvas().get_pixel(1, 1), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_hidden_overlay_not_drawn() {
        let mut manager = manager_with_image(2, 2);
        manager
            .add_overlay("A", Color::RED, 1.0, Some(&square_mask(2, 0, 0)))
            .unwrap();
        manager.set_layer_enabled("A", false).unwrap();
        let mut surface = RasterSurface::new(2, 2);
        manager.draw(&mut surface);
        assert_eq!(*surface.canvas().get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        assert!(manager.set_layer_enabled("nope", false).is_err());
    }

    #[test]
    fn test_undo_redo_settings() {
        let mut manager = manager_with_image(2, 2);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        manager.add_undo_point("x");

        manager.overlay_mut("A").unwrap().set_color(Color::GREEN);
        manager.apply_overlay("A").unwrap();

        assert!(manager.undo());
        assert_eq!(manager.overlay("A").unwrap().color_applied(), Color::RED);
        assert!(manager.can_redo());

        assert!(manager.redo());
        assert_eq!(manager.overlay("A").unwrap().color_applied(), Color::GREEN);
        assert!(manager.can_undo());
    }

    #[test]
    fn test_undo_resurrects_removed_overlay() {
        let mut manager = manager_with_image(2, 2);
        manager
            .add_overlay("A", Color::RED, 0.5, Some(&square_mask(2, 1, 1)))
            .unwrap();
        manager.add_undo_point("keep A");
        manager.remove_overlay("A").unwrap();
        assert!(manager.overlays().is_empty());

        manager.undo();
        let overlay = manager.overlay("A").unwrap();
        assert_eq!(*overlay.image().get_pixel(1, 1), Rgba([255, 0, 0, 255]));
        assert!(overlay.is_active());
    }

    #[test]
    fn test_undo_drops_overlay_added_later() {
        let mut manager = manager_with_image(2, 2);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        manager.add_undo_point("only A");
        manager.add_overlay("B", Color::BLUE, 0.5, None).unwrap();

        manager.undo();
        assert_eq!(manager.overlays().len(), 1);
        manager.redo();
        assert_eq!(manager.overlays().len(), 2);
    }

    #[test]
    fn test_undo_underflow_is_noop() {
        let mut manager = LayerManager::default();
        assert!(!manager.undo());
        assert!(!manager.redo());
    }

    #[test]
    fn test_disabled_undo_ignores_points() {
        let mut manager = LayerManager::default();
        manager.set_undo_enabled(false);
        assert!(!manager.add_undo_point("x"));
        assert!(!manager.can_undo());
    }

    #[test]
    fn test_empty_comment_becomes_timestamp() {
        let mut manager = LayerManager::default();
        manager.add_undo_point("");
        let comment = manager.undo_manager().peek_undo_comment(false).unwrap();
        assert_eq!(comment.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_batched_update_notifies_once() {
        let mut manager = manager_with_image(2, 2);
        let events = record_changes(&mut manager);
        manager.update(|m| {
            m.add_overlay("A", Color::RED, 0.5, None).unwrap();
            m.update(|m| {
                m.add_overlay("B", Color::BLUE, 0.5, None).unwrap();
            });
            assert!(m.is_updating());
        });
        assert_eq!(*events.borrow(), vec![ChangeEvent::Layers]);
        assert!(!manager.is_updating());
    }

    #[test]
    fn test_markers_notify() {
        let mut manager = LayerManager::default();
        let events = record_changes(&mut manager);
        manager.add_marker(1.0, 1.0);
        manager.clear_markers();
        manager.clear_markers();
        assert_eq!(events.borrow().len(), 3);
        assert!(manager.markers().is_empty());
    }

    #[test]
    fn test_zoom_steps_are_rounded() {
        let mut manager = LayerManager::default();
        manager.zoom_in();
        assert_eq!(manager.zoom(), 1.4);
        manager.zoom_in();
        assert_eq!(manager.zoom(), 1.96);
        manager.clear_zoom();
        manager.zoom_out();
        assert_eq!(manager.zoom(), 0.714);
        assert!(manager.set_zoom(0.0).is_err());
    }

    #[test]
    fn test_combined_mode_apply() {
        let mut manager = manager_with_image(2, 2);
        manager.set_split_layers(false);
        manager
            .add_combined("cat", Color::RED, 0.5, Some(&square_mask(2, 0, 0)))
            .unwrap();
        manager
            .add_combined("dog", Color::BLUE, 0.5, Some(&square_mask(2, 1, 1)))
            .unwrap()
            .set_color(Color::GREEN);

        assert_eq!(manager.apply_sub_layer("dog").unwrap(), 1);
        let combined = manager.combined().unwrap();
        assert_eq!(
            Color::from(*combined.image().unwrap().get_pixel(1, 1)),
            Color::GREEN.with_alpha(0.5)
        );
        assert!(manager.apply_overlay("cat").is_err());
    }

    #[test]
    fn test_settings_json_round_trip() {
        let mut manager = manager_with_image(2, 2);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        let json = manager.settings_to_json().unwrap();

        manager.overlay_mut("A").unwrap().set_alpha(0.9).unwrap();
        manager.set_layer_enabled("A", false).unwrap();

        assert_eq!(manager.settings_from_json(&json).unwrap(), 3);
        let overlay = manager.overlay("A").unwrap();
        assert_eq!(overlay.alpha(), 0.5);
        assert!(overlay.is_enabled());
    }

    #[test]
    fn test_settings_skip_unknown_layers() {
        let mut manager = manager_with_image(2, 2);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        let settings = manager.settings();
        manager.remove_overlay("A").unwrap();
        assert_eq!(manager.set_settings(&settings), 2);
        assert!(manager.overlays().is_empty());
    }

    #[test]
    fn test_clear_keeps_image() {
        let mut manager = manager_with_image(3, 3);
        manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
        manager.add_undo_point("x");
        manager.clear();
        assert_eq!(manager.width(), 3);
        assert!(manager.overlays().is_empty());
        assert!(!manager.can_undo());
    }
}
