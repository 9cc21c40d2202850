//! Error types for co-teaching training.

use thiserror::Error;

/// Result type for co-teaching operations.
pub type CoTeachResult<T> = Result<T, CoTeachError>;

/// Errors that can occur while training, checkpointing or evaluating.
#[derive(Debug, Error)]
pub enum CoTeachError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle::Error),

    /// Invalid configuration, reported before training starts
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A checkpoint could not be written or fully loaded
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Dataset could not be read or is inconsistent
    #[error("Data error: {0}")]
    Data(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Metrics report could not be written
    #[error("Report error: {0}")]
    Report(#[from] csv::Error),
}

impl CoTeachError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }
}
