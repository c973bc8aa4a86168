//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding, or (de)crypting entries.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization or deserialization failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Encryption or decryption failed.
    ///
    /// Authentication-tag mismatches (including wrong passwords) and
    /// malformed envelopes both surface here.
    #[error("crypto error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },

    /// The entry is structurally invalid.
    #[error("invalid entry: {message}")]
    InvalidEntry {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Creates an invalid-entry error.
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Json(_) => "CODEC",
            Self::Crypto { .. } => "CRYPTO",
            Self::InvalidEntry { .. } => "VALIDATION",
        }
    }
}
