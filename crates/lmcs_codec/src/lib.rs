//! # LMCS Codec
//!
//! Wire-format layer for LMCS: the log-entry model, its canonical JSON
//! serialization, the per-entry checksum discipline, and the envelope
//! encryption used by encrypted storage files.
//!
//! ## Design Principles
//!
//! - One [`LogEntry`] is one unit of persistence and recovery
//! - The canonical form of an entry is a single JSON object; backends
//!   decide how those objects are framed on disk
//! - Checksums cover the entry serialized *without* its checksum field
//! - Encrypted payloads are self-describing: salt, IV, auth tag, and
//!   iteration count travel inside every [`EncryptedPayload`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod vault;

pub use entry::{Document, LogEntry, Operation, TRANSACTIONS_COLLECTION};
pub use error::{CodecError, CodecResult};
pub use vault::{
    CryptoVault, EncryptedPayload, ENVELOPE_VERSION, IV_SIZE, KEY_SIZE, PBKDF2_ITERATIONS,
    SALT_SIZE, TAG_SIZE,
};
