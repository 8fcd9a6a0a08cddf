//! Error types for the changes writer

use thiserror::Error;

use chanlog_core::EncodingError;
use chanlog_storage::BucketError;

/// Errors that can occur while writing or reading channel logs
#[derive(Debug, Error)]
pub enum WriterError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] BucketError),

    /// Stored bytes could not be decoded, or a log could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The channel writer was stopped and accepts no more writes
    #[error("Writer for channel {0:?} is stopped")]
    WriterStopped(String),

    /// The writer's background task panicked or was cancelled
    #[error("Writer task for channel {channel:?} failed: {reason}")]
    TaskFailed { channel: String, reason: String },

    /// Some batches or seeds could not be committed before a checkpoint
    #[error("{failed_writes} write(s) failed to commit in channels {channels:?}")]
    CommitFailed {
        channels: Vec<String>,
        failed_writes: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for writer operations
pub type WriterResult<T> = Result<T, WriterError>;
