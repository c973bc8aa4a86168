//! Cross-process file locking.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Options controlling lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Number of acquisition attempts before giving up.
    pub retries: u32,
    /// Age in milliseconds after which a held lock is considered stale
    /// and may be broken.
    pub stale_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            stale_ms: 5_000,
        }
    }
}

impl LockOptions {
    /// Sets the retry budget.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the stale timeout in milliseconds.
    #[must_use]
    pub const fn stale_ms(mut self, stale_ms: u64) -> Self {
        self.stale_ms = stale_ms;
        self
    }
}

/// Base delay for exponential backoff between acquisition attempts.
const BACKOFF_BASE_MS: u64 = 50;

/// A scoped, cross-process exclusive lock tied to a path.
///
/// The lock is an OS advisory lock on a dedicated lock file. A holder
/// that dies without releasing leaves a breakable lock: once its file is
/// older than the stale timeout, the next acquirer deletes it and takes
/// over.
///
/// The lock is released (and its file removed) on [`FileLock::release`]
/// or on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Acquires an exclusive lock on `path`, waiting per `options`.
    ///
    /// The lock file's parent directory is created if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Lock`] once the retry budget is exhausted.
    pub fn acquire(path: &Path, options: LockOptions) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut attempt = 0u32;
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            if file.try_lock_exclusive().is_ok() {
                let mut lock = Self {
                    path: path.to_path_buf(),
                    file: Some(file),
                };
                lock.stamp();
                return Ok(lock);
            }
            drop(file);

            let stale = Self::is_stale(path, options.stale_ms);
            if stale {
                warn!(path = %path.display(), "breaking stale lock file");
                // Best-effort: the holder may release concurrently.
                let _ = fs::remove_file(path);
            }

            attempt += 1;
            if attempt >= options.retries {
                return Err(StorageError::lock(format!(
                    "could not acquire {} after {} attempts",
                    path.display(),
                    options.retries
                )));
            }
            if !stale {
                std::thread::sleep(Duration::from_millis(BACKOFF_BASE_MS << attempt.min(6)));
            }
        }
    }

    /// Brackets a critical section under the lock.
    pub fn with_lock<T>(
        path: &Path,
        options: LockOptions,
        f: impl FnOnce() -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut lock = Self::acquire(path, options)?;
        let result = f();
        lock.release()?;
        result
    }

    /// Releases the lock and deletes the lock file.
    pub fn release(&mut self) -> StorageResult<()> {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
            drop(file);
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refreshes the lock file's timestamp so it reads as held.
    fn stamp(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = file.set_len(0);
            let _ = writeln!(file, "{}", std::process::id());
            let _ = file.flush();
        }
    }

    fn is_stale(path: &Path, stale_ms: u64) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age.as_millis() as u64 > stale_ms)
            .unwrap_or(false)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
