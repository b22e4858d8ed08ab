//! Error types for the scene core

use thiserror::Error;

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;

/// Errors raised by ray generation, the model and the trainer.
///
/// An empty dataset is not an error: `Trainer::train_step` reports it as
/// `StepOutcome::Skipped`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Malformed camera pose: {0}")]
    MalformedPose(String),

    #[error("Degenerate ray at pixel ({row}, {col})")]
    DegenerateRay { row: usize, col: usize },

    #[error("Invalid resolution: {0}")]
    InvalidResolution(usize),

    #[error("Invalid half field of view: {0} rad")]
    InvalidFieldOfView(f32),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Resolution mismatch: expected {expected}, got {actual}")]
    ResolutionMismatch { expected: usize, actual: usize },

    #[error("Image buffer holds {actual} values, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Numeric divergence at step {step}, update discarded")]
    NumericDivergence { step: usize },

    #[error("Tensor data error: {0}")]
    TensorData(String),
}
