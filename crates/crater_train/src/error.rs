//! Error types for crater training.

use thiserror::Error;

pub type TrainResult<T> = std::result::Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Rejected at construction time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The data loader would yield zero batches for an epoch
    #[error("dataset yields no batches: {samples} samples with batch size {batch_size}")]
    NoBatches { samples: usize, batch_size: usize },

    /// Model output disagrees with the injected noise
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}
