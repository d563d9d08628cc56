//! Maskstack - Layer Compositing and Undo Engine
//!
//! Maskstack keeps the layers of an image-annotation view consistent:
//! a background fill, the base image, and the annotation masks drawn on
//! top of it. Annotation masks come in one of two exclusive modes:
//! 1. Split mode - one overlay layer per class
//! 2. Combined mode - one shared raster, partitioned by class color
//!
//! # Architecture
//!
//! - Layers stage parameter edits (color, alpha, brightness) and only
//!   touch pixels when the edit is applied
//! - The [`LayerManager`] owns the stack, the zoom and the markers, and
//!   composites everything into a host-provided [`Surface`]
//! - Undo points are full snapshots of every layer, rasters included
//!
//! The host owns windowing, input and image I/O.

pub mod annotation;
pub mod config;
pub mod engine;
pub mod error;
pub mod layers;
pub mod markers;
pub mod state;

pub use annotation::{
    export_annotations, import_annotations, AnnotationContext, ColorProvider, ImportOptions,
    LayerVisibility, SegmentationData,
};
pub use config::{EngineConfig, MarkerConfig};
pub use engine::{Color, FixedViewport, RasterSurface, Surface, Viewport};
pub use error::{LayerError, Result};
pub use layers::{AnnotationMode, Layer, LayerKind, LayerManager, LayerState};
pub use markers::{MarkerShape, Markers};
pub use state::{UndoManager, UndoPoint};
