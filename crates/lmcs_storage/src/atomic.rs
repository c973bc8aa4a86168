//! Atomic whole-file replacement.

use crate::error::StorageResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Replaces `path` with `bytes` using write-then-rename.
///
/// 1. Write to `<path>.tmp`
/// 2. Sync the temp file to disk
/// 3. Rename the temp file over the target
/// 4. Fsync the directory so the rename itself is durable
///
/// A crash at any point leaves either the old file or the new file,
/// never a torn mixture.
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp_path = temp_path(path);

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    sync_parent(path)?;

    Ok(())
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    os.into()
}

#[cfg(unix)]
pub(crate) fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_parent(_path: &Path) -> StorageResult<()> {
    // NTFS journaling covers metadata durability; directory fsync is not
    // available on Windows.
    Ok(())
}
