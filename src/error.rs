//! Error types for the elastica system

use thiserror::Error;

/// Main error type for elastica operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Submatrix copy attempted between incompatible tensors
    #[error("Shape mismatch for parameter `{name}`: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Manifest name of the offending parameter
        name: String,
        /// Shape the operation required
        expected: Vec<usize>,
        /// Shape that was actually present
        found: Vec<usize>,
    },

    /// EWC state requested for a task that never completed
    #[error("Missing task snapshot: {0}")]
    MissingSnapshot(String),

    /// Snapshot store is append-only; a task completes exactly once
    #[error("Snapshot for task {0} already recorded")]
    DuplicateSnapshot(usize),

    /// Fisher estimation asked for more draws than the sample pool holds
    #[error("Insufficient Fisher samples: requested {requested}, available {available}")]
    InsufficientSamples {
        /// Number of draws requested
        requested: usize,
        /// Number of distinct samples available without replacement
        available: usize,
    },

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for elastica operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shape-mismatch error
    pub fn shape_mismatch(
        name: impl Into<String>,
        expected: impl Into<Vec<usize>>,
        found: impl Into<Vec<usize>>,
    ) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a missing-snapshot error
    pub fn missing_snapshot(msg: impl Into<String>) -> Self {
        Self::MissingSnapshot(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
