//! Error types for chanlog-core

use thiserror::Error;

/// Errors raised while encoding or decoding a channel log
#[derive(Debug, Error)]
pub enum EncodingError {
    /// A value could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The stored bytes do not hold a valid record at `offset`
    #[error("Corrupt channel log at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    /// A record carries flag bits this version does not know about
    #[error("Invalid entry flags {flags:#04x} at byte {offset}")]
    InvalidFlags { offset: usize, flags: u8 },

    /// The log header is missing
    #[error("Channel log is empty")]
    MissingHeader,
}

impl EncodingError {
    /// Create a new Corrupt error
    pub fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<postcard::Error> for EncodingError {
    fn from(err: postcard::Error) -> Self {
        EncodingError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_error_mentions_offset() {
        let err = EncodingError::corrupt(42, "unexpected end of input");
        assert!(matches!(err, EncodingError::Corrupt { offset: 42, .. }));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_invalid_flags_display() {
        let err = EncodingError::InvalidFlags {
            offset: 3,
            flags: 0x10,
        };
        assert!(err.to_string().contains("0x10"));
    }
}
