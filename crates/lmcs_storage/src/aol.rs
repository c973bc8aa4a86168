//! Append-only log storage backend.

use crate::atomic::sync_parent;
use crate::backend::{EntryStream, Lifecycle, Storage};
use crate::error::{StorageError, StorageResult};
use crate::fold::fold_last_writer;
use crate::line::{decode_line, encode_line};
use fs2::FileExt;
use lmcs_codec::{CryptoVault, LogEntry};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Append-only log storage.
///
/// The log file is NDJSON: one entry per line, each line either the
/// entry's canonical JSON or an independently-decryptable encrypted
/// envelope. New entries are only ever appended; compaction rewrites the
/// file through an atomic rename.
///
/// # Durability
///
/// Appends are buffered; once the buffer reaches its threshold (or
/// [`Storage::flush`] is called) all buffered lines are appended and the
/// file is fsynced. `append` alone therefore risks at most one buffer's
/// worth of entries on a crash; callers needing synchronous durability
/// flush explicitly (the transaction commit path does).
///
/// # Corruption handling
///
/// Reads skip malformed and undecryptable lines with a warning, so a
/// torn tail never invalidates the log. Checksum mismatches on data
/// entries are a hard [`StorageError::Corruption`]; mismatches on
/// transaction envelopes are skipped leniently.
pub struct AolStorage {
    lifecycle: Lifecycle,
    shared: Arc<AolShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct AolShared {
    path: PathBuf,
    vault: Option<Arc<CryptoVault>>,
    enable_checksums: bool,
    buffer_size: usize,
    compaction_interval: Duration,
    io: Mutex<AolIo>,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

#[derive(Default)]
struct AolIo {
    file: Option<File>,
    buffer: Vec<LogEntry>,
}

/// Suffix for the compaction scratch file.
const COMPACT_SUFFIX: &str = ".compact";

impl AolStorage {
    /// Creates an append-only log backend over `path`.
    #[must_use]
    pub fn new(
        path: PathBuf,
        vault: Option<Arc<CryptoVault>>,
        enable_checksums: bool,
        buffer_size: usize,
        compaction_interval: Duration,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            shared: Arc::new(AolShared {
                path,
                vault,
                enable_checksums,
                buffer_size: buffer_size.max(1),
                compaction_interval,
                io: Mutex::new(AolIo::default()),
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    fn spawn_compactor(&self) -> StorageResult<()> {
        if self.shared.compaction_interval.is_zero() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("lmcs-aol-compactor".into())
            .spawn(move || loop {
                let mut stop = shared.stop.lock();
                if *stop {
                    break;
                }
                let _ = shared
                    .stop_cv
                    .wait_for(&mut stop, shared.compaction_interval);
                if *stop {
                    break;
                }
                drop(stop);
                if let Err(e) = AolShared::compact(&shared) {
                    warn!(error = %e, "background compaction failed");
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

impl AolShared {
    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Appends all buffered lines and fsyncs, holding the file's
    /// advisory lock for the duration of the write.
    fn flush_io(&self, io: &mut MutexGuard<'_, AolIo>) -> StorageResult<()> {
        if io.buffer.is_empty() {
            return Ok(());
        }

        let mut batch = String::new();
        for entry in &io.buffer {
            batch.push_str(&encode_line(entry, self.vault.as_deref())?);
            batch.push('\n');
        }

        let file = io.file.as_mut().ok_or(StorageError::NotInitialized)?;
        file.lock_exclusive()
            .map_err(|e| StorageError::lock(format!("aol flush: {e}")))?;
        let result = file
            .write_all(batch.as_bytes())
            .and_then(|()| file.sync_all());
        let _ = file.unlock();
        result?;

        debug!(count = io.buffer.len(), path = %self.path.display(), "flushed aol batch");
        io.buffer.clear();
        Ok(())
    }

    /// Streams the live file into last-writer state and atomically
    /// replaces it with the survivors.
    fn compact(shared: &Arc<Self>) -> StorageResult<()> {
        let mut io = shared.io.lock();
        shared.flush_io(&mut io)?;

        let file = io.file.as_mut().ok_or(StorageError::NotInitialized)?;

        let folded = {
            let reader = File::open(&shared.path)?;
            let stream = AolEntryIter::new(reader, shared.vault.clone(), shared.enable_checksums);
            fold_last_writer(stream)?
        };

        if folded.is_empty() {
            file.lock_exclusive()
                .map_err(|e| StorageError::lock(format!("aol compact: {e}")))?;
            let result = file.set_len(0).and_then(|()| file.sync_all());
            let _ = file.unlock();
            result?;
            debug!(path = %shared.path.display(), "compacted aol to empty file");
            return Ok(());
        }

        let mut scratch_os = shared.path.as_os_str().to_os_string();
        scratch_os.push(COMPACT_SUFFIX);
        let scratch_path: PathBuf = scratch_os.into();

        {
            let mut scratch = File::create(&scratch_path)?;
            for entry in &folded {
                scratch.write_all(encode_line(entry, shared.vault.as_deref())?.as_bytes())?;
                scratch.write_all(b"\n")?;
            }
            scratch.sync_all()?;
        }

        file.lock_exclusive()
            .map_err(|e| StorageError::lock(format!("aol compact: {e}")))?;
        let renamed = fs::rename(&scratch_path, &shared.path);
        let _ = file.unlock();
        renamed?;
        sync_parent(&shared.path)?;

        // The held handle still points at the replaced inode.
        io.file = Some(Self::open_file(&shared.path)?);

        debug!(
            path = %shared.path.display(),
            surviving = folded.len(),
            "compacted aol"
        );
        Ok(())
    }
}

impl Storage for AolStorage {
    fn initialize(&self) -> StorageResult<()> {
        self.lifecycle.open()?;
        if let Some(parent) = self.shared.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.shared.io.lock().file = Some(AolShared::open_file(&self.shared.path)?);
        self.spawn_compactor()
    }

    fn append(&self, mut entry: LogEntry) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        if self.shared.enable_checksums {
            entry.seal()?;
        }
        let mut io = self.shared.io.lock();
        io.buffer.push(entry);
        if io.buffer.len() >= self.shared.buffer_size {
            self.shared.flush_io(&mut io)?;
        }
        Ok(())
    }

    fn read_entries(&self) -> StorageResult<EntryStream> {
        self.lifecycle.ensure_open()?;
        {
            let mut io = self.shared.io.lock();
            self.shared.flush_io(&mut io)?;
        }
        if !self.shared.path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        let file = File::open(&self.shared.path)?;
        Ok(Box::new(AolEntryIter::new(
            file,
            self.shared.vault.clone(),
            self.shared.enable_checksums,
        )))
    }

    fn flush(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        let mut io = self.shared.io.lock();
        self.shared.flush_io(&mut io)
    }

    fn close(&self) -> StorageResult<()> {
        if self.lifecycle.close() {
            self.stop_worker();
            let mut io = self.shared.io.lock();
            self.shared.flush_io(&mut io)?;
            io.file = None;
        }
        Ok(())
    }

    fn compact(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        AolShared::compact(&self.shared)
    }

    fn clear(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        let mut io = self.shared.io.lock();
        io.buffer.clear();
        if let Some(file) = io.file.as_mut() {
            file.set_len(0)?;
            file.sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AolStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AolStorage")
            .field("path", &self.shared.path)
            .field("buffer_size", &self.shared.buffer_size)
            .field("encrypted", &self.shared.vault.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for AolStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Streaming iterator over an AOL file.
struct AolEntryIter {
    lines: std::io::Lines<BufReader<File>>,
    vault: Option<Arc<CryptoVault>>,
    enable_checksums: bool,
}

impl AolEntryIter {
    fn new(file: File, vault: Option<Arc<CryptoVault>>, enable_checksums: bool) -> Self {
        Self {
            lines: BufReader::new(file).lines(),
            vault,
            enable_checksums,
        }
    }
}

impl Iterator for AolEntryIter {
    type Item = StorageResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line, self.vault.as_deref(), self.enable_checksums) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
