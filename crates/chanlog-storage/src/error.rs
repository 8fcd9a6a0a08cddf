//! Error types for chanlog-storage
//!
//! This module defines the error types returned by [`Bucket`](crate::Bucket)
//! implementations.

use thiserror::Error;

/// Errors that can occur in bucket operations
#[derive(Debug, Error)]
pub enum BucketError {
    /// Requested document was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// An optimistic write kept losing races and gave up
    #[error("Gave up updating {key} after {attempts} conflicting attempts")]
    RetriesExhausted { key: String, attempts: usize },

    /// The update callback refused to produce a new value
    #[error("Update rejected: {0}")]
    Update(String),

    /// I/O error from the underlying storage
    #[error("I/O error: {0}")]
    Io(String),
}

impl BucketError {
    /// Create a new NotFound error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Create a new Update error
    pub fn update(message: impl Into<String>) -> Self {
        Self::Update(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Whether the error means the document does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for BucketError {
    fn from(err: std::io::Error) -> Self {
        BucketError::Io(err.to_string())
    }
}
