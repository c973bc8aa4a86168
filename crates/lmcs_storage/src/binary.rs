//! Single-file binary container backend.

use crate::atomic::replace_file;
use crate::backend::{EntryStream, Lifecycle, Storage};
use crate::error::{StorageError, StorageResult};
use lmcs_codec::{CryptoVault, EncryptedPayload, LogEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Magic string identifying an LMCS binary container.
pub const BINARY_MAGIC: &str = "LMCS";
/// Current container format version.
pub const BINARY_VERSION: u32 = 1;

/// Framed container header.
///
/// Stored as JSON between two big-endian length prefixes:
///
/// ```text
/// [u32 BE headerLen][headerJSON][u32 BE payloadLen][payload]
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct ContainerHeader {
    magic: String,
    version: u32,
    /// Hex SHA-256 of the payload bytes.
    checksum: String,
    encrypted: bool,
}

/// Binary snapshot storage.
///
/// The whole entry sequence is held in memory and written as one framed
/// container. Every append rewrites the container, which is acceptable
/// for this backend's small-to-medium target; the rewrite is atomic
/// (temp + rename), so the file is always either the old or the new
/// complete container.
///
/// The payload is either the raw JSON entry array or, when encryption is
/// enabled, a serialized [`EncryptedPayload`] whose plaintext is that
/// array. Payload integrity is covered by the header checksum.
pub struct BinaryStorage {
    lifecycle: Lifecycle,
    path: PathBuf,
    vault: Option<Arc<CryptoVault>>,
    entries: Mutex<Vec<LogEntry>>,
}

impl BinaryStorage {
    /// Creates a binary container backend over `path`.
    #[must_use]
    pub fn new(path: PathBuf, vault: Option<Arc<CryptoVault>>) -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            path,
            vault,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> StorageResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(());
        }

        let (header, payload) = Self::split_container(&bytes)?;

        if header.magic != BINARY_MAGIC {
            return Err(StorageError::corruption(format!(
                "bad magic {:?}, expected {BINARY_MAGIC:?}",
                header.magic
            )));
        }
        if header.version != BINARY_VERSION {
            return Err(StorageError::corruption(format!(
                "unsupported container version {}",
                header.version
            )));
        }

        let digest = hex::encode(Sha256::digest(payload));
        if digest != header.checksum {
            return Err(StorageError::corruption(
                "payload checksum mismatch".to_string(),
            ));
        }

        let array = if header.encrypted {
            let Some(vault) = &self.vault else {
                warn!(
                    path = %self.path.display(),
                    "container is encrypted but no key is configured; starting empty"
                );
                return Ok(());
            };
            let payload: EncryptedPayload =
                serde_json::from_slice(payload).map_err(|e| {
                    StorageError::corruption(format!("malformed encrypted payload: {e}"))
                })?;
            match vault.decrypt(&payload) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "could not decrypt container; starting empty"
                    );
                    return Ok(());
                }
            }
        } else {
            String::from_utf8(payload.to_vec())
                .map_err(|_| StorageError::corruption("payload is not UTF-8".to_string()))?
        };

        let entries: Vec<LogEntry> = serde_json::from_str(&array)
            .map_err(|e| StorageError::corruption(format!("payload is not an entry array: {e}")))?;

        *self.entries.lock() = entries;
        Ok(())
    }

    fn split_container(bytes: &[u8]) -> StorageResult<(ContainerHeader, &[u8])> {
        let read_frame = |bytes: &[u8], at: usize| -> StorageResult<(usize, usize)> {
            let end = at
                .checked_add(4)
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| StorageError::corruption("truncated length prefix".to_string()))?;
            let len_bytes: [u8; 4] = bytes[at..end]
                .try_into()
                .map_err(|_| StorageError::corruption("invalid length prefix".to_string()))?;
            let len = u32::from_be_bytes(len_bytes) as usize;
            let frame_end = end
                .checked_add(len)
                .filter(|&frame_end| frame_end <= bytes.len())
                .ok_or_else(|| StorageError::corruption("truncated frame".to_string()))?;
            Ok((end, frame_end))
        };

        let (header_start, header_end) = read_frame(bytes, 0)?;
        let header: ContainerHeader = serde_json::from_slice(&bytes[header_start..header_end])
            .map_err(|e| StorageError::corruption(format!("unparseable container header: {e}")))?;

        let (payload_start, payload_end) = read_frame(bytes, header_end)?;
        Ok((header, &bytes[payload_start..payload_end]))
    }

    /// Serializes the current entry set and rewrites the container.
    fn persist(&self, entries: &[LogEntry]) -> StorageResult<()> {
        let array = serde_json::to_string(entries).map_err(lmcs_codec::CodecError::from)?;
        let payload: Vec<u8> = match &self.vault {
            None => array.into_bytes(),
            Some(vault) => {
                let envelope = vault.encrypt(&array)?;
                serde_json::to_vec(&envelope).map_err(lmcs_codec::CodecError::from)?
            }
        };

        let header = ContainerHeader {
            magic: BINARY_MAGIC.to_string(),
            version: BINARY_VERSION,
            checksum: hex::encode(Sha256::digest(&payload)),
            encrypted: self.vault.is_some(),
        };
        let header_bytes = serde_json::to_vec(&header).map_err(lmcs_codec::CodecError::from)?;

        let mut container =
            Vec::with_capacity(8 + header_bytes.len() + payload.len());
        container.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        container.extend_from_slice(&header_bytes);
        container.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        container.extend_from_slice(&payload);

        replace_file(&self.path, &container)
    }
}

impl Storage for BinaryStorage {
    fn initialize(&self) -> StorageResult<()> {
        self.lifecycle.open()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.load()
    }

    fn append(&self, entry: LogEntry) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        let mut entries = self.entries.lock();
        entries.push(entry);
        self.persist(&entries)
    }

    fn read_entries(&self) -> StorageResult<EntryStream> {
        self.lifecycle.ensure_open()?;
        let snapshot = self.entries.lock().clone();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn flush(&self) -> StorageResult<()> {
        // Appends rewrite the container synchronously, so there is
        // nothing buffered to push out.
        self.lifecycle.ensure_open()
    }

    fn close(&self) -> StorageResult<()> {
        self.lifecycle.close();
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open()?;
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries)
    }
}

impl std::fmt::Debug for BinaryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryStorage")
            .field("path", &self.path)
            .field("encrypted", &self.vault.is_some())
            .finish_non_exhaustive()
    }
}
