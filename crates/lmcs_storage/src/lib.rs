//! # LMCS Storage
//!
//! Pluggable storage backends for LMCS log entries.
//!
//! ## Design Principles
//!
//! - Backends persist [`lmcs_codec::LogEntry`] values in strict
//!   insertion order and replay them on demand
//! - The collection and transaction layers own all semantics; backends
//!   only move entries to and from their backing state
//! - Durability points are explicit: `flush` is the barrier
//!
//! ## Available Backends
//!
//! - [`MemoryStorage`] — ordered in-memory list, no persistence
//! - [`JsonStorage`] — snapshot file holding one JSON array
//! - [`BinaryStorage`] — framed container with payload checksum
//! - [`AolStorage`] — append-only NDJSON log with compaction
//!
//! [`FileLock`] provides the cross-process exclusion the database holds
//! for its lifetime.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aol;
mod atomic;
mod backend;
mod binary;
mod error;
mod fold;
mod json;
mod line;
mod lock;
mod memory;

use lmcs_codec::CryptoVault;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use aol::AolStorage;
pub use backend::{EntryStream, Storage};
pub use binary::{BinaryStorage, BINARY_MAGIC, BINARY_VERSION};
pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use lock::{FileLock, LockOptions};
pub use memory::MemoryStorage;

/// Selects a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// In-memory, no persistence.
    Memory,
    /// Snapshot-JSON file.
    Json,
    /// Framed binary container.
    Binary,
    /// Append-only log.
    Aol,
}

impl StorageType {
    /// Returns the lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Aol => "aol",
        }
    }

    /// Returns true for backends that persist to disk.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            "aol" => Ok(Self::Aol),
            other => Err(StorageError::config(format!(
                "unknown storage type {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options shared by the storage factory.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Backing file path; required for persistent backends.
    pub path: Option<PathBuf>,
    /// Vault for transparent encryption; `None` stores plaintext.
    pub vault: Option<Arc<CryptoVault>>,
    /// Seal and verify per-entry checksums (AOL and JSON backends).
    pub enable_checksums: bool,
    /// AOL write-buffer threshold before an implicit flush.
    pub buffer_size: usize,
    /// Interval between automatic AOL compactions; zero disables.
    pub compaction_interval: Duration,
    /// Interval between JSON autosaves; zero disables the worker and
    /// makes every append flush immediately.
    pub autosave_interval: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            path: None,
            vault: None,
            enable_checksums: true,
            buffer_size: 100,
            compaction_interval: Duration::from_secs(60),
            autosave_interval: Duration::from_secs(5),
        }
    }
}

/// Constructs a backend of the given type.
///
/// The backend is returned uninitialized; callers invoke
/// [`Storage::initialize`] before use.
///
/// # Errors
///
/// Returns a configuration error when a persistent backend is requested
/// without a path.
pub fn create_storage(
    storage_type: StorageType,
    options: StorageOptions,
) -> StorageResult<Arc<dyn Storage>> {
    let require_path = |options: &StorageOptions| -> StorageResult<PathBuf> {
        options.path.clone().ok_or_else(|| {
            StorageError::config(format!(
                "storage type {storage_type} requires a file path"
            ))
        })
    };

    let storage: Arc<dyn Storage> = match storage_type {
        StorageType::Memory => Arc::new(MemoryStorage::new()),
        StorageType::Json => Arc::new(JsonStorage::new(
            require_path(&options)?,
            options.vault,
            options.enable_checksums,
            options.autosave_interval,
        )),
        StorageType::Binary => Arc::new(BinaryStorage::new(require_path(&options)?, options.vault)),
        StorageType::Aol => Arc::new(AolStorage::new(
            require_path(&options)?,
            options.vault,
            options.enable_checksums,
            options.buffer_size,
            options.compaction_interval,
        )),
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmcs_codec::LogEntry;
    use tempfile::tempdir;

    #[test]
    fn storage_type_parsing() {
        assert_eq!("memory".parse::<StorageType>().unwrap(), StorageType::Memory);
        assert_eq!("json".parse::<StorageType>().unwrap(), StorageType::Json);
        assert_eq!("binary".parse::<StorageType>().unwrap(), StorageType::Binary);
        assert_eq!("aol".parse::<StorageType>().unwrap(), StorageType::Aol);
        assert!("sqlite".parse::<StorageType>().is_err());
    }

    #[test]
    fn persistent_backends_require_path() {
        for storage_type in [StorageType::Json, StorageType::Binary, StorageType::Aol] {
            let result = create_storage(storage_type, StorageOptions::default());
            assert!(matches!(result, Err(StorageError::Config { .. })));
        }
    }

    #[test]
    fn memory_needs_no_path() {
        let storage = create_storage(StorageType::Memory, StorageOptions::default()).unwrap();
        storage.initialize().unwrap();
        storage.flush().unwrap();
    }

    #[test]
    fn factory_backends_roundtrip() {
        let dir = tempdir().unwrap();
        for storage_type in [StorageType::Json, StorageType::Binary, StorageType::Aol] {
            let path = dir.path().join(format!("db.{storage_type}"));
            let options = StorageOptions {
                path: Some(path),
                autosave_interval: Duration::ZERO,
                compaction_interval: Duration::ZERO,
                ..StorageOptions::default()
            };
            let storage = create_storage(storage_type, options).unwrap();
            storage.initialize().unwrap();

            let mut doc = lmcs_codec::Document::new();
            doc.insert("_id".into(), serde_json::json!("1"));
            storage.append(LogEntry::insert("c", "1", doc)).unwrap();
            storage.flush().unwrap();

            let count = storage.read_entries().unwrap().count();
            assert_eq!(count, 1, "backend {storage_type}");
            storage.close().unwrap();
        }
    }
}
