//! Transaction state model.

use crate::document::Document;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Open; operations may still be added.
    Pending,
    /// Durably committed.
    Committed,
    /// Rolled back; its operations were never applied.
    Aborted,
}

/// Kind of a logical transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert a new document.
    Insert,
    /// Rewrite an existing document.
    Update,
    /// Remove a document.
    Delete,
}

/// One staged operation inside a transaction.
///
/// `before` carries the previous document value when it is known (for
/// updates and deletes); `after` carries the new value when one exists.
#[derive(Debug, Clone)]
pub struct TxOperation {
    /// What the operation does.
    pub kind: OperationKind,
    /// Target collection.
    pub collection: String,
    /// Target document id.
    pub id: String,
    /// Previous document value, when known.
    pub before: Option<Document>,
    /// New document value, when applicable.
    pub after: Option<Document>,
}

impl TxOperation {
    /// Creates a staged insert.
    #[must_use]
    pub fn insert(collection: &str, id: &str, after: Document) -> Self {
        Self {
            kind: OperationKind::Insert,
            collection: collection.to_string(),
            id: id.to_string(),
            before: None,
            after: Some(after),
        }
    }

    /// Creates a staged update.
    #[must_use]
    pub fn update(collection: &str, id: &str, before: Document, after: Document) -> Self {
        Self {
            kind: OperationKind::Update,
            collection: collection.to_string(),
            id: id.to_string(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// Creates a staged delete.
    #[must_use]
    pub fn delete(collection: &str, id: &str, before: Document) -> Self {
        Self {
            kind: OperationKind::Delete,
            collection: collection.to_string(),
            id: id.to_string(),
            before: Some(before),
            after: None,
        }
    }
}

/// An in-memory transaction record.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Transaction id (UUID).
    pub id: String,
    /// Staged operations in submission order.
    pub operations: Vec<TxOperation>,
    /// Current lifecycle state.
    pub status: TransactionStatus,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Transaction {
    /// Creates a fresh pending transaction.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self {
            id,
            operations: Vec::new(),
            status: TransactionStatus::Pending,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    /// Whether the transaction is still open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}
