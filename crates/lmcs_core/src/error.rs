//! Error types for the database engine.

use std::io;
use thiserror::Error;

/// Result type for database operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced at the database boundary.
///
/// Every variant maps to a stable machine-readable code via
/// [`CoreError::code`], so callers can branch without string matching.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad configuration, duplicate id, or unique-index violation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    /// Checksum, magic, or container-structure mismatch.
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Encryption or decryption failure.
    #[error("crypto error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },

    /// File-lock acquisition failed after retries.
    #[error("lock error: {message}")]
    Lock {
        /// Description of the failure.
        message: String,
    },

    /// Unknown transaction id or wrong transaction state.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the problem.
        message: String,
    },

    /// Reserved for future multi-writer scenarios.
    #[error("concurrency error: {message}")]
    Concurrency {
        /// Description of the conflict.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] lmcs_storage::StorageError),

    /// Entry codec or envelope error.
    #[error("codec error: {0}")]
    Codec(#[from] lmcs_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Creates a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a concurrency error.
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::Corruption { .. } => "CORRUPTION",
            Self::Crypto { .. } => "CRYPTO",
            Self::Lock { .. } => "LOCK",
            Self::Transaction { .. } => "TRANSACTION",
            Self::Concurrency { .. } => "CONCURRENCY",
            Self::Storage(e) => e.code(),
            Self::Codec(e) => e.code(),
            Self::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::validation("x").code(), "VALIDATION");
        assert_eq!(CoreError::transaction("x").code(), "TRANSACTION");
        assert_eq!(CoreError::crypto("x").code(), "CRYPTO");
        assert_eq!(CoreError::lock("x").code(), "LOCK");
        assert_eq!(CoreError::corruption("x").code(), "CORRUPTION");
        assert_eq!(CoreError::concurrency("x").code(), "CONCURRENCY");
    }

    #[test]
    fn wrapped_errors_delegate_codes() {
        let storage = CoreError::from(lmcs_storage::StorageError::corruption("bad"));
        assert_eq!(storage.code(), "CORRUPTION");

        let codec = CoreError::from(lmcs_codec::CodecError::crypto("bad"));
        assert_eq!(codec.code(), "CRYPTO");
    }
}
