//! Error types for the mailtriage classification system
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for propagation at the binary seam.

use thiserror::Error;

/// Main error type for mailtriage operations
#[derive(Error, Debug)]
pub enum TriageError {
    /// Fewer than the minimum number of evidence entries exist or resolve
    /// to embedding records; recoverable, no state change
    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    /// Classification was requested before any successful training
    #[error("Model not trained for owner: {0}")]
    ModelNotTrained(String),

    /// The owner has no classifier, in memory or on disk
    #[error("No classifier found for owner: {0}")]
    ClassifierNotFound(String),

    /// Referenced email ids have no matching embedding record
    #[error("Unresolved embedding reference: {0}")]
    UnresolvedReference(String),

    /// Embedding or ground-truth store unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Disk write or read of persisted classifier state failed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Model fitting failed
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for mailtriage operations
pub type Result<T> = std::result::Result<T, TriageError>;

impl From<anyhow::Error> for TriageError {
    fn from(err: anyhow::Error) -> Self {
        TriageError::Other(err.to_string())
    }
}
