//! Layer Model Module
//!
//! Implements the layer stack, drawn in fixed order:
//! - Background: solid fill
//! - Image: the base photo, with staged brightness
//! - Annotations: either one overlay per class (split mode) or a single
//!   combined layer whose raster is partitioned by class color

mod background;
mod combined;
mod image;
mod layer;
mod manager;
mod overlay;
mod state;

pub use self::image::{ImageLayer, IMAGE_LAYER_NAME};
pub use background::{BackgroundLayer, BACKGROUND_LAYER_NAME};
pub use combined::{CombinedLayer, CombinedSubLayer, COMBINED_LAYER_NAME};
pub use layer::{Layer, LayerInfo, LayerKind, LayerRef};
pub use manager::{AnnotationMode, BestFitEvent, ChangeEvent, LayerManager, LayerSnapshot};
pub use overlay::OverlayLayer;
pub use state::{
    BackgroundState, CombinedState, CombinedSubLayerState, ImageState, LayerState, OverlayState,
};
