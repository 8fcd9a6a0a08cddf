//! Logging setup errors

use thiserror::Error;

/// Errors that can occur while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// A level or filter directive did not parse
    #[error("Invalid filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    /// The log file could not be opened
    #[error("Failed to open log file: {0}")]
    File(String),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

impl LogError {
    pub fn invalid_filter(directive: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidFilter {
            directive: directive.into(),
            reason: reason.to_string(),
        }
    }
}
