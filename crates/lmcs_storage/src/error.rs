//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entry codec or crypto error.
    #[error("codec error: {0}")]
    Codec(#[from] lmcs_codec::CodecError),

    /// The backing file is corrupted.
    #[error("storage corrupted: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// File-lock acquisition failed.
    #[error("lock acquisition failed: {message}")]
    Lock {
        /// Description of the failure.
        message: String,
    },

    /// The backend has not been initialized.
    #[error("storage is not initialized")]
    NotInitialized,

    /// The backend has been closed.
    #[error("storage is closed")]
    Closed,

    /// The backend does not support this optional operation.
    #[error("operation not supported by this backend: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// Invalid backend configuration.
    #[error("invalid storage configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Codec(e) => e.code(),
            Self::Corruption { .. } => "CORRUPTION",
            Self::Lock { .. } => "LOCK",
            Self::NotInitialized | Self::Closed => "STATE",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::Config { .. } => "VALIDATION",
        }
    }
}
