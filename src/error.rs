//! Error types for Kavlo Fatigue

use thiserror::Error;

/// Errors that can occur while loading, training, or exporting
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Failed to parse value at row {row}, column {column}: {value:?}")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid filter cutoff: normalized cutoff {0} must lie in (0, 1)")]
    InvalidCutoff(f64),

    #[error("Signal too short for zero-phase filtering: {len} samples, need more than {min}")]
    SignalTooShort { len: usize, min: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Unsupported operation for integer kernels: {0}")]
    UnsupportedOp(String),

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),
}
