//! Storage trait definition and lifecycle tracking.

use crate::error::{StorageError, StorageResult};
use lmcs_codec::LogEntry;
use std::sync::atomic::{AtomicU8, Ordering};

/// A lazily-evaluated, write-ordered sequence of log entries.
///
/// Streams are finite and owned: they hold no borrow of the backend, so
/// callers may interleave other storage calls while consuming one. A
/// stream reflects the backend state at the moment it was created;
/// restart by calling [`Storage::read_entries`] again.
pub type EntryStream = Box<dyn Iterator<Item = StorageResult<LogEntry>> + Send>;

/// A storage backend for log entries.
///
/// Backends persist [`LogEntry`] values in strict insertion order and
/// replay them on demand. They differ in durability model:
///
/// - [`crate::MemoryStorage`] keeps everything in memory
/// - [`crate::JsonStorage`] and [`crate::BinaryStorage`] rewrite a full
///   snapshot file
/// - [`crate::AolStorage`] appends to a line-delimited log
///
/// # Invariants
///
/// - `append` preserves insertion order; it may buffer
/// - after `flush` returns, every prior `append` is durable (no-op for
///   the memory backend)
/// - `read_entries` yields entries in write order
/// - operations before `initialize` or after `close` fail with
///   [`StorageError::NotInitialized`] / [`StorageError::Closed`]
///
/// `compact` and `clear` are optional capabilities; backends that do not
/// support them return [`StorageError::Unsupported`].
pub trait Storage: Send + Sync {
    /// Opens or creates the backing state.
    ///
    /// Must be called exactly once before any other operation.
    fn initialize(&self) -> StorageResult<()>;

    /// Persists one entry, preserving insertion order. May buffer.
    fn append(&self, entry: LogEntry) -> StorageResult<()>;

    /// Produces a fresh stream over all entries in write order.
    fn read_entries(&self) -> StorageResult<EntryStream>;

    /// Makes all prior appends durable.
    fn flush(&self) -> StorageResult<()>;

    /// Flushes and releases resources. The backend is unusable afterwards.
    fn close(&self) -> StorageResult<()>;

    /// Collapses history into current last-writer state.
    fn compact(&self) -> StorageResult<()> {
        Err(StorageError::unsupported("compact"))
    }

    /// Discards all entries.
    fn clear(&self) -> StorageResult<()> {
        Err(StorageError::unsupported("clear"))
    }
}

const STATE_NEW: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Shared lifecycle tracking for backends.
///
/// Tracks the new → open → closed progression every backend follows.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Transitions to open; fails if already open or closed.
    pub(crate) fn open(&self) -> StorageResult<()> {
        match self
            .state
            .compare_exchange(STATE_NEW, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(STATE_CLOSED) => Err(StorageError::Closed),
            Err(_) => Err(StorageError::config("storage is already initialized")),
        }
    }

    /// Ensures the backend is open.
    pub(crate) fn ensure_open(&self) -> StorageResult<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => Ok(()),
            STATE_CLOSED => Err(StorageError::Closed),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Transitions to closed. Returns whether this call did the closing.
    pub(crate) fn close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_OPEN
    }
}
