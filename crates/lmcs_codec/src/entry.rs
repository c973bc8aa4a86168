//! Log-entry model and canonical serialization.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved collection name for transaction envelope entries.
pub const TRANSACTIONS_COLLECTION: &str = "_transactions";

/// A document: a JSON object keyed by field name.
///
/// The reserved key `_id` holds the document identifier.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Operation carried by a [`LogEntry`].
///
/// `Begin`, `Commit`, and `Rollback` are transaction envelope operations;
/// they are stored in the reserved [`TRANSACTIONS_COLLECTION`] and carry
/// no document payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Insert a new document.
    Insert,
    /// Rewrite an existing document.
    Update,
    /// Remove a document.
    Delete,
    /// Open a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Abort a transaction.
    Rollback,
}

impl Operation {
    /// Returns true for the transaction envelope operations.
    #[must_use]
    pub const fn is_envelope(self) -> bool {
        matches!(self, Self::Begin | Self::Commit | Self::Rollback)
    }
}

/// The canonical unit of persistence and recovery.
///
/// One entry describes one operation against one document (or one
/// transaction lifecycle event). The canonical wire form is the JSON
/// object produced by [`LogEntry::to_line`]; field order follows the
/// struct declaration and is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The operation this entry records.
    pub op: Operation,
    /// Owning collection (for envelope entries, [`TRANSACTIONS_COLLECTION`]).
    pub collection: String,
    /// Document id, or transaction id for envelope entries.
    pub id: String,
    /// Document payload; present for INSERT/UPDATE, absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    /// Hex SHA-256 over the entry serialized without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Transaction id linking this entry to a BEGIN envelope.
    #[serde(rename = "txId", default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

/// Current time in milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl LogEntry {
    fn new(op: Operation, collection: &str, id: &str, data: Option<Document>) -> Self {
        Self {
            op,
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            checksum: None,
            timestamp: now_millis(),
            tx_id: None,
        }
    }

    /// Creates an INSERT entry.
    #[must_use]
    pub fn insert(collection: &str, id: &str, data: Document) -> Self {
        Self::new(Operation::Insert, collection, id, Some(data))
    }

    /// Creates an UPDATE entry.
    #[must_use]
    pub fn update(collection: &str, id: &str, data: Document) -> Self {
        Self::new(Operation::Update, collection, id, Some(data))
    }

    /// Creates a DELETE entry.
    #[must_use]
    pub fn delete(collection: &str, id: &str) -> Self {
        Self::new(Operation::Delete, collection, id, None)
    }

    /// Creates a BEGIN envelope entry for the given transaction id.
    #[must_use]
    pub fn begin(tx_id: &str) -> Self {
        Self::new(Operation::Begin, TRANSACTIONS_COLLECTION, tx_id, None)
    }

    /// Creates a COMMIT envelope entry for the given transaction id.
    #[must_use]
    pub fn commit(tx_id: &str) -> Self {
        Self::new(Operation::Commit, TRANSACTIONS_COLLECTION, tx_id, None)
    }

    /// Creates a ROLLBACK envelope entry for the given transaction id.
    #[must_use]
    pub fn rollback(tx_id: &str) -> Self {
        Self::new(Operation::Rollback, TRANSACTIONS_COLLECTION, tx_id, None)
    }

    /// Tags this entry with a transaction id.
    #[must_use]
    pub fn with_tx(mut self, tx_id: &str) -> Self {
        self.tx_id = Some(tx_id.to_string());
        self
    }

    /// Returns true when this entry is a transaction envelope.
    #[must_use]
    pub fn is_envelope(&self) -> bool {
        self.op.is_envelope()
    }

    /// Computes the hex SHA-256 digest of this entry with the checksum
    /// field cleared.
    pub fn compute_checksum(&self) -> CodecResult<String> {
        let mut unsealed = self.clone();
        unsealed.checksum = None;
        let bytes = serde_json::to_vec(&unsealed)?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(digest))
    }

    /// Stamps the entry with its checksum.
    pub fn seal(&mut self) -> CodecResult<()> {
        self.checksum = Some(self.compute_checksum()?);
        Ok(())
    }

    /// Verifies the stored checksum.
    ///
    /// Entries without a checksum verify trivially; a stored checksum
    /// must match the recomputed digest.
    pub fn verify(&self) -> CodecResult<bool> {
        match &self.checksum {
            None => Ok(true),
            Some(stored) => Ok(stored == &self.compute_checksum()?),
        }
    }

    /// Serializes the entry to its canonical single-line JSON form.
    pub fn to_line(&self) -> CodecResult<String> {
        if self.op.is_envelope() || self.op == Operation::Delete {
            if self.data.is_some() {
                return Err(CodecError::invalid_entry(format!(
                    "{:?} entries carry no document payload",
                    self.op
                )));
            }
        } else if self.data.is_none() {
            return Err(CodecError::invalid_entry(format!(
                "{:?} entries require a document payload",
                self.op
            )));
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an entry from a canonical JSON line.
    pub fn from_line(line: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_doc() -> Document {
        let mut doc = Document::new();
        doc.insert("_id".into(), json!("user-1"));
        doc.insert("name".into(), json!("Alice"));
        doc.insert("age".into(), json!(30));
        doc
    }

    #[test]
    fn insert_roundtrip() {
        let entry = LogEntry::insert("users", "user-1", sample_doc());
        let line = entry.to_line().unwrap();
        let decoded = LogEntry::from_line(&line).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn wire_field_names() {
        let entry = LogEntry::insert("users", "user-1", sample_doc()).with_tx("tx-9");
        let line = entry.to_line().unwrap();
        assert!(line.contains("\"op\":\"INSERT\""));
        assert!(line.contains("\"txId\":\"tx-9\""));
        assert!(!line.contains("tx_id"));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let entry = LogEntry::delete("users", "user-1");
        let line = entry.to_line().unwrap();
        assert!(!line.contains("\"data\""));
        assert!(!line.contains("\"checksum\""));
        assert!(!line.contains("\"txId\""));
    }

    #[test]
    fn delete_rejects_payload() {
        let mut entry = LogEntry::delete("users", "user-1");
        entry.data = Some(sample_doc());
        assert!(entry.to_line().is_err());
    }

    #[test]
    fn insert_requires_payload() {
        let mut entry = LogEntry::insert("users", "user-1", sample_doc());
        entry.data = None;
        assert!(entry.to_line().is_err());
    }

    #[test]
    fn envelope_entries() {
        let begin = LogEntry::begin("tx-1");
        assert!(begin.is_envelope());
        assert_eq!(begin.collection, TRANSACTIONS_COLLECTION);
        assert_eq!(begin.id, "tx-1");
        assert!(!LogEntry::delete("users", "u").is_envelope());
    }

    #[test]
    fn seal_and_verify() {
        let mut entry = LogEntry::insert("users", "user-1", sample_doc());
        entry.seal().unwrap();
        assert!(entry.checksum.is_some());
        assert!(entry.verify().unwrap());
    }

    #[test]
    fn tampering_breaks_checksum() {
        let mut entry = LogEntry::insert("users", "user-1", sample_doc());
        entry.seal().unwrap();
        entry.id = "user-2".into();
        assert!(!entry.verify().unwrap());
    }

    #[test]
    fn checksum_excludes_itself() {
        let mut entry = LogEntry::insert("users", "user-1", sample_doc());
        let before = entry.compute_checksum().unwrap();
        entry.seal().unwrap();
        assert_eq!(entry.compute_checksum().unwrap(), before);
    }

    #[test]
    fn unsealed_entry_verifies() {
        let entry = LogEntry::update("users", "user-1", sample_doc());
        assert!(entry.verify().unwrap());
    }

    #[test]
    fn unknown_op_rejected() {
        let line = r#"{"op":"UPSERT","collection":"users","id":"x","timestamp":0}"#;
        assert!(LogEntry::from_line(line).is_err());
    }

    proptest! {
        #[test]
        fn line_roundtrip(
            collection in "[a-z]{1,12}",
            id in "[a-z0-9-]{1,24}",
            name in ".{0,32}",
            age in any::<i64>(),
        ) {
            let mut doc = Document::new();
            doc.insert("_id".into(), json!(id.clone()));
            doc.insert("name".into(), json!(name));
            doc.insert("age".into(), json!(age));
            let mut entry = LogEntry::insert(&collection, &id, doc);
            entry.seal().unwrap();

            let line = entry.to_line().unwrap();
            let decoded = LogEntry::from_line(&line).unwrap();
            prop_assert_eq!(&entry, &decoded);
            prop_assert!(decoded.verify().unwrap());
        }
    }
}
