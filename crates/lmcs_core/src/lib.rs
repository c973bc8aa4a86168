//! # LMCS Core
//!
//! Embedded document database engine for LMCS.
//!
//! This crate provides:
//! - [`Database`] — orchestrator holding the file lock, recovery, and
//!   the transactional scope
//! - [`Collection`] — in-memory mirror of one document set with
//!   MongoDB-style filters and hash indexes
//! - [`IndexManager`] / [`IndexDefinition`] — single- and compound-field
//!   hash indexes with unique and sparse options
//! - [`TransactionManager`] — ACID transaction lifecycle over the
//!   storage log
//!
//! ## Example
//!
//! ```no_run
//! use lmcs_core::{Database, DatabaseConfig, StorageType};
//! use serde_json::json;
//!
//! # fn main() -> lmcs_core::CoreResult<()> {
//! let db = Database::new(
//!     DatabaseConfig::new(StorageType::Aol)
//!         .database_name("app")
//!         .custom_path("./lmcs-data"),
//! )?;
//! db.initialize()?;
//!
//! let users = db.collection("users")?;
//! users.insert(json!({"name": "Alice", "age": 30}))?;
//! let alice = users.find_one(&json!({"name": "Alice"}));
//! assert!(alice.is_some());
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod document;
mod error;
mod index;
mod query;
mod transaction;

pub use collection::Collection;
pub use config::{DatabaseConfig, DEFAULT_DATA_DIR};
pub use database::{Database, DatabaseStats, TransactionContext};
pub use document::{compare_values, lookup_path, Document, ID_FIELD};
pub use error::{CoreError, CoreResult};
pub use index::{IndexDefinition, IndexManager};
pub use query::{matches, sort_documents, FindOptions, SortDirection};
pub use transaction::{
    OperationKind, RecoveryReport, Transaction, TransactionManager, TransactionStatus, TxOperation,
};

pub use lmcs_codec::{CryptoVault, EncryptedPayload, LogEntry, Operation};
pub use lmcs_storage::{Storage, StorageError, StorageType};
