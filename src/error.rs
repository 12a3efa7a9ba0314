// THEORY:
// The `error` module defines the hard-failure taxonomy of the engine. Only
// resource acquisition (image decode, file IO, the external contour extractor)
// and caller mistakes (invalid configuration) are allowed to surface as errors.
// Numeric edge cases inside a stage are handled locally with fallback constants,
// and data-quality findings travel as `ValidationResult`s, never as errors.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a contour-extraction adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContourError {
    #[error("contour extractor rejected the image: {0}")]
    Rejected(String),

    #[error("contour extractor failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("contour extraction failed: {cause}")]
    ContourExtraction {
        #[source]
        cause: ContourError,
    },

    #[error("contour extraction timed out after {0:?}")]
    ContourTimeout(Duration),

    #[error("pipeline invocation was cancelled")]
    Cancelled,

    #[error("stage cache actor is no longer running")]
    CacheUnavailable,

    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl From<ContourError> for VisionError {
    fn from(cause: ContourError) -> Self {
        VisionError::ContourExtraction { cause }
    }
}

pub type VisionResult<T> = Result<T, VisionError>;
