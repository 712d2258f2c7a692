// THEORY:
// Every way a single analysis request can fail is listed here, once. The
// pipeline never returns a partial result: a request either produces a full
// `AnalysisResult` or one of these errors, and each error carries a stable,
// machine-readable kind so a consumer (CLI, service layer) can map it to its
// own transport without string matching on messages.
//
// Metadata problems are deliberately absent from `AnalysisError`. They are
// absorbed by the metadata extractor, which falls back to defaults, so they
// live in `core_modules::metadata` and never cross this boundary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A request-level failure of the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Feature vector has {actual} entries but the model expects {expected}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("Model is not available: {0}")]
    ModelUnavailable(String),

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Stable identifier for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::ImageDecode(_) => "image_decode_error",
            AnalysisError::SchemaMismatch { .. } => "schema_mismatch_error",
            AnalysisError::ModelUnavailable(_) => "model_unavailable_error",
            AnalysisError::InvalidParameter { .. } => "invalid_parameter_error",
            AnalysisError::Internal(_) => "internal_error",
        }
    }
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        AnalysisError::ImageDecode(err.to_string())
    }
}

/// Failure to load the model artifact at startup.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Failed to read model artifact {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid model artifact: {0}")]
    Invalid(String),
}

/// The structured body reported for any failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub success: bool,
    pub error_kind: String,
    pub error: String,
}

impl FailureReport {
    pub fn new(error_kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: error_kind.into(),
            error: error.into(),
        }
    }
}

impl From<&AnalysisError> for FailureReport {
    fn from(err: &AnalysisError) -> Self {
        FailureReport::new(err.kind(), err.to_string())
    }
}
