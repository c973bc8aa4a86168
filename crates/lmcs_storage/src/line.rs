//! Shared line codec for entry-per-line storage.

use crate::error::{StorageError, StorageResult};
use lmcs_codec::{CryptoVault, EncryptedPayload, LogEntry};
use tracing::warn;

/// Encodes one entry as a single line, encrypting it when a vault is
/// configured.
pub(crate) fn encode_line(entry: &LogEntry, vault: Option<&CryptoVault>) -> StorageResult<String> {
    let plain = entry.to_line()?;
    match vault {
        None => Ok(plain),
        Some(vault) => {
            let payload = vault.encrypt(&plain)?;
            Ok(serde_json::to_string(&payload).map_err(lmcs_codec::CodecError::from)?)
        }
    }
}

/// Decodes one line back into an entry.
///
/// Returns `Ok(None)` for lines that are skipped leniently: malformed
/// JSON, undecryptable envelopes, and envelope entries with a bad
/// checksum. Data entries with a bad checksum are a hard corruption
/// error.
pub(crate) fn decode_line(
    line: &str,
    vault: Option<&CryptoVault>,
    verify_checksums: bool,
) -> StorageResult<Option<LogEntry>> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "skipping malformed log line");
            return Ok(None);
        }
    };

    let entry_value = if EncryptedPayload::looks_encrypted(&value) {
        let Some(vault) = vault else {
            warn!("skipping encrypted log line: no encryption key configured");
            return Ok(None);
        };
        let payload: EncryptedPayload = match serde_json::from_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "skipping malformed encrypted envelope");
                return Ok(None);
            }
        };
        let plain = match vault.decrypt(&payload) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "skipping undecryptable log line");
                return Ok(None);
            }
        };
        match serde_json::from_str(&plain) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "skipping malformed decrypted log line");
                return Ok(None);
            }
        }
    } else {
        value
    };

    let entry: LogEntry = match serde_json::from_value(entry_value) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(error = %e, "skipping unparseable log entry");
            return Ok(None);
        }
    };

    if !verify_entry(&entry, verify_checksums)? {
        return Ok(None);
    }

    Ok(Some(entry))
}

/// Applies the checksum policy to an already-parsed entry.
///
/// Returns `Ok(true)` to keep the entry, `Ok(false)` to skip it
/// (envelope with a bad checksum), or a corruption error for data
/// entries that fail verification.
pub(crate) fn verify_entry(entry: &LogEntry, verify_checksums: bool) -> StorageResult<bool> {
    if !verify_checksums || entry.verify()? {
        return Ok(true);
    }
    if entry.is_envelope() {
        warn!(
            collection = %entry.collection,
            id = %entry.id,
            "skipping transaction envelope with checksum mismatch"
        );
        return Ok(false);
    }
    Err(StorageError::corruption(format!(
        "checksum mismatch for entry {}:{}",
        entry.collection, entry.id
    )))
}
