//! Database orchestration.
//!
//! The database wires the pieces together: it builds the configured
//! storage backend, holds the file lock for its whole lifetime, recovers
//! and replays the log on open, hands out collection handles, and runs
//! transactional scopes one at a time.

use crate::collection::{normalize_document, Collection};
use crate::config::DatabaseConfig;
use crate::document::{Document, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexManager;
use crate::query::matches;
use crate::transaction::{TransactionManager, TxOperation};
use lmcs_codec::{CryptoVault, TRANSACTIONS_COLLECTION};
use lmcs_storage::{
    create_storage, FileLock, LockOptions, Storage, StorageOptions, StorageType,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot of database-level counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Which backend the database runs on.
    pub storage_type: StorageType,
    /// Number of materialized collections.
    pub collections: usize,
    /// Total documents across all collections.
    pub documents: usize,
    /// Total registered indexes.
    pub indexes: usize,
}

/// An embedded document database.
///
/// Construct with [`Database::new`], open with [`Database::initialize`],
/// and shut down with [`Database::close`]. All methods take `&self`;
/// operations are logically serialized at the database boundary.
pub struct Database {
    config: DatabaseConfig,
    storage: Arc<dyn Storage>,
    indexes: Arc<IndexManager>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    tx_manager: Option<TransactionManager>,
    /// FIFO gate: at most one transactional scope runs at a time.
    tx_scope: Mutex<()>,
    lock: Mutex<Option<FileLock>>,
    initialized: AtomicBool,
}

impl Database {
    /// Validates the configuration and constructs the storage backend.
    ///
    /// No I/O happens here; call [`Database::initialize`] to open files
    /// and rebuild state.
    pub fn new(config: DatabaseConfig) -> CoreResult<Self> {
        config.validate()?;

        let vault = match &config.encryption_key {
            Some(key) => Some(Arc::new(CryptoVault::new(key.clone())?)),
            None => None,
        };
        let storage = create_storage(
            config.storage_type,
            StorageOptions {
                path: config.data_path(),
                vault,
                enable_checksums: config.enable_checksums,
                buffer_size: config.buffer_size,
                compaction_interval: config.compaction_interval,
                autosave_interval: config.autosave_interval,
            },
        )?;

        // Persistent backends always get a manager so recovery runs on
        // open, even when the transaction API itself is disabled.
        let tx_manager = if config.transactions_enabled() || config.storage_type.is_persistent() {
            Some(TransactionManager::new(Arc::clone(&storage)))
        } else {
            None
        };

        Ok(Self {
            config,
            storage,
            indexes: Arc::new(IndexManager::new()),
            collections: RwLock::new(HashMap::new()),
            tx_manager,
            tx_scope: Mutex::new(()),
            lock: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Opens the database: acquires the file lock, initializes storage,
    /// recovers incomplete transactions, and replays the log into
    /// in-memory collections.
    pub fn initialize(&self) -> CoreResult<()> {
        if let Some(lock_path) = self.config.lock_path() {
            let lock = FileLock::acquire(&lock_path, LockOptions::default())
                .map_err(|e| CoreError::lock(e.to_string()))?;
            *self.lock.lock() = Some(lock);
        }

        self.storage.initialize()?;

        let committed = match &self.tx_manager {
            Some(manager) => manager.recover()?.committed,
            None => Default::default(),
        };

        let mut replayed = 0usize;
        for entry in self.storage.read_entries()? {
            let entry = entry?;
            if entry.collection == TRANSACTIONS_COLLECTION {
                continue;
            }
            if let Some(tx_id) = &entry.tx_id {
                if !committed.contains(tx_id) {
                    continue;
                }
            }
            self.collection_handle(&entry.collection).apply_entry(&entry);
            replayed += 1;
        }
        debug!(entries = replayed, "replayed log into collections");

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_initialized(&self) -> CoreResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::validation("database is not initialized"))
        }
    }

    /// Returns a handle to a collection, materializing it lazily.
    ///
    /// Names starting with an underscore are reserved for engine use.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.ensure_initialized()?;
        if name.is_empty() {
            return Err(CoreError::validation("collection name must not be empty"));
        }
        if name.starts_with('_') {
            return Err(CoreError::validation(format!(
                "collection names starting with underscore are reserved: {name:?}"
            )));
        }
        Ok(self.collection_handle(name))
    }

    fn collection_handle(&self, name: &str) -> Arc<Collection> {
        if let Some(collection) = self.collections.read().get(name) {
            return Arc::clone(collection);
        }
        let mut collections = self.collections.write();
        Arc::clone(collections.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Collection::new(
                name.to_string(),
                Arc::clone(&self.storage),
                Arc::clone(&self.indexes),
            ))
        }))
    }

    /// Runs a transactional scope.
    ///
    /// Scopes queue behind a FIFO gate so at most one runs at a time.
    /// The closure stages operations on a [`TransactionContext`]; when
    /// it returns `Ok` the transaction commits durably and its
    /// operations are applied to in-memory state, when it returns `Err`
    /// the transaction rolls back and the error is rethrown unchanged.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut TransactionContext<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_initialized()?;
        if !self.config.transactions_enabled() {
            return Err(CoreError::transaction(
                "transactions are disabled for this database",
            ));
        }
        let manager = self
            .tx_manager
            .as_ref()
            .ok_or_else(|| CoreError::transaction("transactions are disabled for this database"))?;

        let _scope = self.tx_scope.lock();
        let tx_id = manager.begin()?;
        let mut ctx = TransactionContext {
            db: self,
            manager,
            tx_id: tx_id.clone(),
        };

        match f(&mut ctx) {
            Ok(value) => match manager.commit(&tx_id) {
                Ok(operations) => {
                    self.apply_operations(&operations);
                    Ok(value)
                }
                Err(commit_err) => {
                    if let Err(e) = manager.rollback(&tx_id) {
                        warn!(%tx_id, error = %e, "rollback after failed commit also failed");
                    }
                    Err(commit_err)
                }
            },
            Err(user_err) => {
                if let Err(e) = manager.rollback(&tx_id) {
                    warn!(%tx_id, error = %e, "rollback failed");
                }
                Err(user_err)
            }
        }
    }

    fn apply_operations(&self, operations: &[TxOperation]) {
        for operation in operations {
            let collection = self.collection_handle(&operation.collection);
            match operation.kind {
                crate::transaction::OperationKind::Insert
                | crate::transaction::OperationKind::Update => {
                    if let Some(after) = &operation.after {
                        collection.apply_upsert(&operation.id, after.clone());
                    }
                }
                crate::transaction::OperationKind::Delete => {
                    collection.apply_delete(&operation.id);
                }
            }
        }
    }

    /// Collapses storage history into current state, where the backend
    /// supports it.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_initialized()?;
        Ok(self.storage.compact()?)
    }

    /// Forces all buffered writes to disk.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_initialized()?;
        Ok(self.storage.flush()?)
    }

    /// Alias for [`Database::flush`].
    pub fn save(&self) -> CoreResult<()> {
        self.flush()
    }

    /// Returns database-level counters.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.ensure_initialized()?;
        let collections = self.collections.read();
        let documents = collections.values().map(|c| c.count()).sum();
        let indexes = collections
            .keys()
            .map(|name| self.indexes.index_count(name))
            .sum();
        Ok(DatabaseStats {
            storage_type: self.config.storage_type,
            collections: collections.len(),
            documents,
            indexes,
        })
    }

    /// Flushes, closes storage, and releases the file lock.
    ///
    /// Closing an already-closed (or never-opened) database is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.close()?;
        if let Some(mut lock) = self.lock.lock().take() {
            lock.release()
                .map_err(|e| CoreError::lock(e.to_string()))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("storage_type", &self.config.storage_type)
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Handle passed to a transactional scope.
///
/// Operations staged here become durable only when the scope commits.
/// Reads see committed state overlaid with this transaction's own
/// pending writes.
pub struct TransactionContext<'a> {
    db: &'a Database,
    manager: &'a TransactionManager,
    tx_id: String,
}

impl TransactionContext<'_> {
    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.tx_id
    }

    /// Committed state of a collection overlaid with this transaction's
    /// staged operations.
    fn effective_docs(&self, collection: &str) -> CoreResult<HashMap<String, Document>> {
        let handle = self.db.collection(collection)?;
        let mut docs = handle.snapshot();
        for operation in self.manager.operations(&self.tx_id)? {
            if operation.collection != collection {
                continue;
            }
            match operation.kind {
                crate::transaction::OperationKind::Insert
                | crate::transaction::OperationKind::Update => {
                    if let Some(after) = operation.after {
                        docs.insert(operation.id, after);
                    }
                }
                crate::transaction::OperationKind::Delete => {
                    docs.remove(&operation.id);
                }
            }
        }
        Ok(docs)
    }

    /// Stages an insert. Returns the document id.
    ///
    /// Duplicate ids and unique-index violations are detected against
    /// the same overlaid view reads see, so two staged writes can never
    /// collide with each other or with committed state.
    pub fn insert(&mut self, collection: &str, doc: Value) -> CoreResult<String> {
        let (id, doc) = normalize_document(doc)?;
        let effective = self.effective_docs(collection)?;
        if effective.contains_key(&id) {
            return Err(CoreError::validation(format!(
                "duplicate document id {id:?} in collection {collection:?}"
            )));
        }
        self.db
            .indexes
            .check_unique_in(collection, &id, &doc, &effective)?;
        self.manager
            .add_operation(&self.tx_id, TxOperation::insert(collection, &id, doc))?;
        Ok(id)
    }

    /// Stages updates for every matching document. Returns the count.
    pub fn update(&mut self, collection: &str, filter: &Value, updates: &Value) -> CoreResult<usize> {
        let Some(update_map) = updates.as_object() else {
            return Err(CoreError::validation("updates must be a JSON object"));
        };
        let mut effective = self.effective_docs(collection)?;
        // Materialize matches first; the view is then kept current as
        // each staged update lands, so a later merge cannot slip a
        // unique-field collision past an earlier one.
        let matched: Vec<(String, Document)> = effective
            .iter()
            .filter(|(_, doc)| matches(doc, filter))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        let mut count = 0;
        for (id, old) in matched {
            let mut merged = old.clone();
            for (key, value) in update_map {
                merged.insert(key.clone(), value.clone());
            }
            merged.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            self.db
                .indexes
                .check_unique_in(collection, &id, &merged, &effective)?;
            self.manager.add_operation(
                &self.tx_id,
                TxOperation::update(collection, &id, old, merged.clone()),
            )?;
            effective.insert(id, merged);
            count += 1;
        }
        Ok(count)
    }

    /// Stages deletes for every matching document. Returns the count.
    pub fn remove(&mut self, collection: &str, filter: &Value) -> CoreResult<usize> {
        let effective = self.effective_docs(collection)?;
        let mut count = 0;
        for (id, old) in effective {
            if !matches(&old, filter) {
                continue;
            }
            self.manager
                .add_operation(&self.tx_id, TxOperation::delete(collection, &id, old))?;
            count += 1;
        }
        Ok(count)
    }

    /// Reads the first matching document, seeing committed state plus
    /// this transaction's pending writes.
    pub fn get(&self, collection: &str, filter: &Value) -> CoreResult<Option<Value>> {
        let effective = self.effective_docs(collection)?;
        Ok(effective
            .into_values()
            .find(|doc| matches(doc, filter))
            .map(Value::Object))
    }
}

impl std::fmt::Debug for TransactionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("tx_id", &self.tx_id)
            .finish_non_exhaustive()
    }
}
