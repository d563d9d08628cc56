//! Error handling for Maskstack
//!
//! Usage errors (calling an operation in the wrong annotation mode) are
//! returned as values and must not be ignored. Transient conditions such
//! as a missing image or an unsized viewport are not errors at all.

use thiserror::Error;

use crate::layers::AnnotationMode;

/// Result type alias for Maskstack operations
pub type Result<T> = std::result::Result<T, LayerError>;

/// Main error type for layer, compositing and undo operations
#[derive(Error, Debug)]
pub enum LayerError {
    // Usage Errors
    #[error("'{operation}' requires {required} mode, but the manager is in {actual} mode")]
    WrongMode {
        operation: &'static str,
        required: AnnotationMode,
        actual: AnnotationMode,
    },

    // Layer Errors
    #[error("Layer already exists: {name}")]
    DuplicateLayer { name: String },

    #[error("Layer not found: {name}")]
    LayerNotFound { name: String },

    // Parameter Errors
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    #[error("Invalid color: {value}")]
    InvalidColor { value: String },

    // Undo Errors
    #[error("Undo limit can only be changed while the history is empty")]
    UndoLimitLocked,

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LayerError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            LayerError::WrongMode { .. } => "WRONG_MODE",
            LayerError::DuplicateLayer { .. } => "DUPLICATE_LAYER",
            LayerError::LayerNotFound { .. } => "LAYER_NOT_FOUND",
            LayerError::InvalidParameter { .. } => "INVALID_PARAMETER",
            LayerError::InvalidColor { .. } => "INVALID_COLOR",
            LayerError::UndoLimitLocked => "UNDO_LIMIT_LOCKED",
            LayerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is a programming error on the caller's side.
    ///
    /// Usage errors are never fixed by retrying the same call.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            LayerError::WrongMode { .. }
                | LayerError::DuplicateLayer { .. }
                | LayerError::UndoLimitLocked
        )
    }

    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        LayerError::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}
