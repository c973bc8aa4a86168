//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::transaction::state::{OperationKind, Transaction, TxOperation};
use lmcs_codec::LogEntry;
use lmcs_storage::Storage;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of a recovery scan.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Ids of transactions with a durable COMMIT envelope. Replay keeps
    /// only tagged entries whose transaction appears here.
    pub committed: HashSet<String>,
    /// Ids of dangling transactions that were rolled back.
    pub rolled_back: Vec<String>,
}

/// Manages transaction lifecycle against the shared storage.
///
/// Commit discipline: every staged operation is appended with its
/// transaction id, the storage is flushed, then the COMMIT envelope is
/// appended and flushed. A transaction is durable iff its COMMIT is on
/// disk; recovery rolls back everything else.
pub struct TransactionManager {
    storage: Arc<dyn Storage>,
    transactions: Mutex<HashMap<String, Transaction>>,
}

impl TransactionManager {
    /// Creates a manager over the shared storage.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a new transaction and writes its BEGIN envelope.
    pub fn begin(&self) -> CoreResult<String> {
        let tx_id = Uuid::new_v4().to_string();
        self.storage.append(LogEntry::begin(&tx_id))?;
        self.transactions
            .lock()
            .insert(tx_id.clone(), Transaction::new(tx_id.clone()));
        debug!(%tx_id, "transaction started");
        Ok(tx_id)
    }

    /// Stages an operation on a pending transaction.
    ///
    /// # Errors
    ///
    /// Returns a transaction error when the id is unknown or the
    /// transaction is no longer pending.
    pub fn add_operation(&self, tx_id: &str, operation: TxOperation) -> CoreResult<()> {
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .get_mut(tx_id)
            .ok_or_else(|| CoreError::transaction(format!("unknown transaction {tx_id:?}")))?;
        if !tx.is_pending() {
            return Err(CoreError::transaction(format!(
                "transaction {tx_id:?} is no longer pending"
            )));
        }
        tx.operations.push(operation);
        Ok(())
    }

    /// Clones the staged operations of a pending transaction.
    pub fn operations(&self, tx_id: &str) -> CoreResult<Vec<TxOperation>> {
        let transactions = self.transactions.lock();
        let tx = transactions
            .get(tx_id)
            .ok_or_else(|| CoreError::transaction(format!("unknown transaction {tx_id:?}")))?;
        Ok(tx.operations.clone())
    }

    /// Commits a transaction and returns its operations so the caller
    /// can apply them to in-memory collections.
    pub fn commit(&self, tx_id: &str) -> CoreResult<Vec<TxOperation>> {
        let operations = self.operations(tx_id)?;

        for operation in &operations {
            self.storage.append(entry_for(operation, tx_id)?)?;
        }
        // The operations must be durable before the COMMIT that makes
        // them visible to recovery.
        self.storage.flush()?;
        self.storage.append(LogEntry::commit(tx_id))?;
        self.storage.flush()?;

        self.transactions.lock().remove(tx_id);
        debug!(%tx_id, operations = operations.len(), "transaction committed");
        Ok(operations)
    }

    /// Rolls back a pending transaction.
    ///
    /// Staged operations are never written to the log before commit, so
    /// there is nothing to undo on disk; the ROLLBACK envelope records
    /// the outcome.
    pub fn rollback(&self, tx_id: &str) -> CoreResult<()> {
        {
            let transactions = self.transactions.lock();
            let tx = transactions
                .get(tx_id)
                .ok_or_else(|| CoreError::transaction(format!("unknown transaction {tx_id:?}")))?;
            if !tx.is_pending() {
                return Err(CoreError::transaction(format!(
                    "transaction {tx_id:?} is no longer pending"
                )));
            }
        }
        self.storage.append(LogEntry::rollback(tx_id))?;
        self.transactions.lock().remove(tx_id);
        debug!(%tx_id, "transaction rolled back");
        Ok(())
    }

    /// Scans the log, rolls back dangling transactions, and reports the
    /// committed id set for replay filtering.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut open: Vec<String> = Vec::new();
        let mut committed = HashSet::new();

        for entry in self.storage.read_entries()? {
            let entry = entry?;
            if !entry.is_envelope() {
                continue;
            }
            match entry.op {
                lmcs_codec::Operation::Begin => {
                    if !open.contains(&entry.id) {
                        open.push(entry.id);
                    }
                }
                lmcs_codec::Operation::Commit => {
                    open.retain(|id| id != &entry.id);
                    committed.insert(entry.id);
                }
                lmcs_codec::Operation::Rollback => {
                    open.retain(|id| id != &entry.id);
                }
                _ => {}
            }
        }

        let mut rolled_back = Vec::new();
        for tx_id in open {
            warn!(%tx_id, "rolling back incomplete transaction");
            self.storage.append(LogEntry::rollback(&tx_id))?;
            rolled_back.push(tx_id);
        }
        if !rolled_back.is_empty() {
            self.storage.flush()?;
        }

        Ok(RecoveryReport {
            committed,
            rolled_back,
        })
    }

    /// Number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions.lock().len()
    }
}

/// Materializes a staged operation as its durable log entry.
fn entry_for(operation: &TxOperation, tx_id: &str) -> CoreResult<LogEntry> {
    let entry = match operation.kind {
        OperationKind::Insert => {
            let after = operation.after.clone().ok_or_else(|| {
                CoreError::transaction("staged insert is missing its document")
            })?;
            LogEntry::insert(&operation.collection, &operation.id, after)
        }
        OperationKind::Update => {
            let after = operation.after.clone().ok_or_else(|| {
                CoreError::transaction("staged update is missing its document")
            })?;
            LogEntry::update(&operation.collection, &operation.id, after)
        }
        OperationKind::Delete => LogEntry::delete(&operation.collection, &operation.id),
    };
    Ok(entry.with_tx(tx_id))
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
