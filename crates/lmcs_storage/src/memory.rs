//! In-memory storage backend.

use crate::backend::{EntryStream, Lifecycle, Storage};
use crate::error::StorageResult;
use crate::fold::fold_last_writer;
use lmcs_codec::LogEntry;
use parking_lot::Mutex;

/// An in-memory storage backend.
///
/// Entries live in an ordered list and never touch disk. Suitable for
/// tests, ephemeral caches, and databases that do not need persistence.
///
/// # Thread Safety
///
/// The backend is thread-safe; internal locking keeps the entry list
/// consistent.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    lifecycle: Lifecycle,
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn initialize(&self) -> StorageResult<()> {
        self.lifecycle.open()
    }

    fn append(&self, entry: LogEntry) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        self.entries.lock().push(entry);
        Ok(())
    }

    fn read_entries(&self) -> StorageResult<EntryStream> {
        self.lifecycle.ensure_open()?;
        let snapshot = self.entries.lock().clone();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn flush(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()
    }

    fn close(&self) -> StorageResult<()> {
        self.lifecycle.close();
        Ok(())
    }

    fn compact(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        let mut entries = self.entries.lock();
        let folded = fold_last_writer(entries.drain(..).map(Ok))?;
        *entries = folded;
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        self.entries.lock().clear();
        Ok(())
    }
}
