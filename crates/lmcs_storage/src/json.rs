//! Snapshot-JSON storage backend.

use crate::atomic::replace_file;
use crate::backend::{EntryStream, Lifecycle, Storage};
use crate::error::{StorageError, StorageResult};
use crate::line::verify_entry;
use lmcs_codec::{CryptoVault, EncryptedPayload, LogEntry};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Snapshot storage: the full entry sequence lives in memory and is
/// periodically written out as one JSON array.
///
/// This is the debug-friendly backend: the file is human-readable unless
/// encryption is enabled, in which case the whole serialized array is
/// wrapped in a single [`EncryptedPayload`].
///
/// Integrity is whole-file. Writes go through temp-file + rename, so a
/// crash mid-flush can lose appends since the previous flush but never
/// corrupts older state.
///
/// An autosave worker flushes dirty state at a configurable interval;
/// an interval of zero disables the worker and makes every append flush
/// immediately.
pub struct JsonStorage {
    lifecycle: Lifecycle,
    shared: Arc<JsonShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct JsonShared {
    path: PathBuf,
    vault: Option<Arc<CryptoVault>>,
    enable_checksums: bool,
    autosave_interval: Duration,
    state: Mutex<JsonState>,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

#[derive(Default)]
struct JsonState {
    entries: Vec<LogEntry>,
    dirty: bool,
}

impl JsonStorage {
    /// Creates a JSON snapshot backend over `path`.
    #[must_use]
    pub fn new(
        path: PathBuf,
        vault: Option<Arc<CryptoVault>>,
        enable_checksums: bool,
        autosave_interval: Duration,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            shared: Arc::new(JsonShared {
                path,
                vault,
                enable_checksums,
                autosave_interval,
                state: Mutex::new(JsonState::default()),
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.shared.path
    }

    fn load(&self) -> StorageResult<()> {
        let shared = &self.shared;
        if !shared.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&shared.path)?;
        if content.trim().is_empty() {
            return Ok(());
        }

        let plaintext = match &shared.vault {
            None => content,
            Some(vault) => {
                let payload: EncryptedPayload = match serde_json::from_str(&content) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            path = %shared.path.display(),
                            error = %e,
                            "encrypted JSON file is not a valid envelope; starting empty"
                        );
                        return Ok(());
                    }
                };
                match vault.decrypt(&payload) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!(
                            path = %shared.path.display(),
                            error = %e,
                            "could not decrypt JSON file; starting empty"
                        );
                        return Ok(());
                    }
                }
            }
        };

        let raw: Vec<LogEntry> = serde_json::from_str(&plaintext).map_err(|e| {
            StorageError::corruption(format!(
                "{} is not a valid entry array: {e}",
                shared.path.display()
            ))
        })?;

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            if verify_entry(&entry, shared.enable_checksums)? {
                entries.push(entry);
            }
        }

        debug!(
            path = %shared.path.display(),
            count = entries.len(),
            "loaded JSON snapshot"
        );
        shared.state.lock().entries = entries;
        Ok(())
    }

    fn spawn_autosave(&self) -> StorageResult<()> {
        if self.shared.autosave_interval.is_zero() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("lmcs-json-autosave".into())
            .spawn(move || loop {
                let mut stop = shared.stop.lock();
                if *stop {
                    break;
                }
                let _ = shared
                    .stop_cv
                    .wait_for(&mut stop, shared.autosave_interval);
                if *stop {
                    break;
                }
                drop(stop);
                if let Err(e) = JsonShared::flush(&shared) {
                    warn!(error = %e, "autosave flush failed");
                }
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn stop_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            *self.shared.stop.lock() = true;
            self.shared.stop_cv.notify_all();
            let _ = handle.join();
        }
    }
}

impl JsonShared {
    /// Serializes the entry array (encrypting when configured) and
    /// atomically replaces the backing file.
    fn flush(shared: &Arc<Self>) -> StorageResult<()> {
        let mut state = shared.state.lock();
        if !state.dirty {
            return Ok(());
        }

        let array = serde_json::to_string(&state.entries).map_err(lmcs_codec::CodecError::from)?;
        let output = match &shared.vault {
            None => array,
            Some(vault) => {
                let payload = vault.encrypt(&array)?;
                serde_json::to_string(&payload).map_err(lmcs_codec::CodecError::from)?
            }
        };

        replace_file(&shared.path, output.as_bytes())?;
        state.dirty = false;
        debug!(path = %shared.path.display(), count = state.entries.len(), "flushed JSON snapshot");
        Ok(())
    }
}

impl Storage for JsonStorage {
    fn initialize(&self) -> StorageResult<()> {
        self.lifecycle.open()?;
        if let Some(parent) = self.shared.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.load()?;
        self.spawn_autosave()
    }

    fn append(&self, mut entry: LogEntry) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        if self.shared.enable_checksums {
            entry.seal()?;
        }
        {
            let mut state = self.shared.state.lock();
            state.entries.push(entry);
            state.dirty = true;
        }
        if self.shared.autosave_interval.is_zero() {
            JsonShared::flush(&self.shared)?;
        }
        Ok(())
    }

    fn read_entries(&self) -> StorageResult<EntryStream> {
        self.lifecycle.ensure_open()?;
        let snapshot = self.shared.state.lock().entries.clone();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn flush(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        JsonShared::flush(&self.shared)
    }

    fn close(&self) -> StorageResult<()> {
        if self.lifecycle.close() {
            self.stop_worker();
            JsonShared::flush(&self.shared)?;
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        {
            let mut state = self.shared.state.lock();
            state.entries.clear();
            state.dirty = true;
        }
        JsonShared::flush(&self.shared)
    }
}

impl std::fmt::Debug for JsonStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStorage")
            .field("path", &self.shared.path)
            .field("encrypted", &self.shared.vault.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for JsonStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
