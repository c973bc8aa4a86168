//! Database configuration.

use crate::error::{CoreError, CoreResult};
use lmcs_storage::StorageType;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory for database files.
pub const DEFAULT_DATA_DIR: &str = "./lmcs-data";

/// Configuration for opening a database.
///
/// Built with [`DatabaseConfig::new`] plus the consuming setters;
/// validated once by [`crate::Database::new`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Which storage backend to use.
    pub storage_type: StorageType,

    /// File basename for persistent backends.
    pub database_name: Option<String>,

    /// Directory that holds the database files.
    pub custom_path: PathBuf,

    /// Enables transparent encryption when set. Must be non-empty.
    pub encryption_key: Option<String>,

    /// Seal and verify per-entry SHA-256 checksums (AOL and JSON).
    pub enable_checksums: bool,

    /// AOL write-buffer threshold before an implicit flush.
    pub buffer_size: usize,

    /// Interval between automatic AOL compactions; zero disables.
    pub compaction_interval: Duration,

    /// Interval between JSON autosaves; zero disables the worker and
    /// makes every append flush immediately.
    pub autosave_interval: Duration,

    /// Whether `transaction()` is allowed. Defaults to true for
    /// persistent backends and false for memory.
    pub enable_transactions: Option<bool>,
}

impl DatabaseConfig {
    /// Creates a configuration for the given backend with defaults.
    #[must_use]
    pub fn new(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            database_name: None,
            custom_path: PathBuf::from(DEFAULT_DATA_DIR),
            encryption_key: None,
            enable_checksums: true,
            buffer_size: 100,
            compaction_interval: Duration::from_secs(60),
            autosave_interval: Duration::from_secs(5),
            enable_transactions: None,
        }
    }

    /// Sets the database file basename.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Sets the directory holding the database files.
    #[must_use]
    pub fn custom_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_path = path.into();
        self
    }

    /// Enables encryption with the given key.
    #[must_use]
    pub fn encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Enables or disables per-entry checksums.
    #[must_use]
    pub const fn enable_checksums(mut self, value: bool) -> Self {
        self.enable_checksums = value;
        self
    }

    /// Sets the AOL write-buffer threshold.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the automatic compaction interval.
    #[must_use]
    pub const fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Sets the JSON autosave interval.
    #[must_use]
    pub const fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Explicitly allows or forbids transactions.
    #[must_use]
    pub const fn enable_transactions(mut self, value: bool) -> Self {
        self.enable_transactions = Some(value);
        self
    }

    /// Whether transactions are enabled after applying the default.
    #[must_use]
    pub fn transactions_enabled(&self) -> bool {
        self.enable_transactions
            .unwrap_or_else(|| self.storage_type.is_persistent())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a persistent backend has no
    /// database name, the encryption key is empty, or the buffer size
    /// is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.storage_type.is_persistent() && self.database_name.is_none() {
            return Err(CoreError::validation(format!(
                "storage type {} requires a database name",
                self.storage_type
            )));
        }
        if let Some(key) = &self.encryption_key {
            if key.is_empty() {
                return Err(CoreError::validation("encryption key must not be empty"));
            }
        }
        if self.buffer_size == 0 {
            return Err(CoreError::validation("buffer size must be at least 1"));
        }
        Ok(())
    }

    /// Path of the data file for persistent backends.
    pub(crate) fn data_path(&self) -> Option<PathBuf> {
        let name = self.database_name.as_deref()?;
        let extension = match self.storage_type {
            StorageType::Memory => return None,
            StorageType::Json => "json",
            StorageType::Binary => "lmcs",
            StorageType::Aol => "aol",
        };
        Some(self.custom_path.join(format!("{name}.{extension}")))
    }

    /// Path of the lock file, next to the data file.
    pub(crate) fn lock_path(&self) -> Option<PathBuf> {
        let name = self.database_name.as_deref()?;
        Some(self.custom_path.join(format!("{name}.lock")))
    }
}
