//! Transaction lifecycle and recovery.

mod manager;
mod state;

pub use manager::{RecoveryReport, TransactionManager};
pub use state::{OperationKind, Transaction, TransactionStatus, TxOperation};
