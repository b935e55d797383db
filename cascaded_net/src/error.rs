//! Error types for network construction and inference.

use thiserror::Error;

/// Errors surfaced by the public [`crate::model::CascadedNet`] API.
///
/// Layer-level code works in `candle_core::Result`; those errors arrive here
/// wrapped in [`SeparationError::Candle`].
#[derive(Error, Debug)]
pub enum SeparationError {
    /// Construction parameters that cannot produce a consistent network.
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),

    /// Tensor shape does not match what a stage requires.
    #[error("shape mismatch at {stage}: expected {expected}, got {got:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: String,
        got: Vec<usize>,
    },

    /// Complex input given to a magnitude network or the other way around.
    #[error("spectrogram kind mismatch: network expects {expected} input, got {got}")]
    KindMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Trimming `offset` frames from each end leaves nothing.
    #[error("cannot trim {offset} frames from both ends of a {frames}-frame mask")]
    DegenerateTrim { frames: usize, offset: usize },

    /// Error raised inside the tensor stack.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// Failed to read a configuration or weights file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed configuration JSON.
    #[error("failed to parse network configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the public API.
pub type SeparationResult<T> = Result<T, SeparationError>;
