//! Crash-recovery properties of the append-only log.

use lmcs_core::{Database, DatabaseConfig, LogEntry, StorageType};
use lmcs_storage::{AolStorage, Storage};
use serde_json::json;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

fn aol_config(dir: &std::path::Path, name: &str) -> DatabaseConfig {
    DatabaseConfig::new(StorageType::Aol)
        .database_name(name)
        .custom_path(dir)
        .compaction_interval(Duration::ZERO)
}

fn open(config: DatabaseConfig) -> Database {
    let db = Database::new(config).unwrap();
    db.initialize().unwrap();
    db
}

/// Every truncated copy of the log reopens to a prefix of the original
/// insert sequence: no gaps, no reordering, no phantom documents.
#[test]
fn truncated_log_reopens_to_a_prefix() {
    let dir = tempdir().unwrap();
    let total = 1000usize;

    {
        let db = open(aol_config(dir.path(), "source").buffer_size(100));
        let records = db.collection("records").unwrap();
        for n in 0..total {
            records
                .insert(json!({"_id": format!("{n:04}"), "n": n}))
                .unwrap();
        }
        db.close().unwrap();
    }

    let content = fs::read(dir.path().join("source.aol")).unwrap();

    // Cut points spread over the whole file, including mid-line tears.
    let cuts: Vec<usize> = (1..=10)
        .map(|i| content.len() * i / 10 - (i * 37) % 53)
        .collect();

    for (case, cut) in cuts.into_iter().enumerate() {
        let copy_dir = tempdir().unwrap();
        fs::write(copy_dir.path().join("source.aol"), &content[..cut]).unwrap();

        let db = open(aol_config(copy_dir.path(), "source"));
        let records = db.collection("records").unwrap();

        let count = records.count();
        assert!(count <= total, "case {case}: too many documents");
        for n in 0..count {
            assert!(
                records
                    .find_one(&json!({"_id": format!("{n:04}")}))
                    .is_some(),
                "case {case}: document {n} missing from a {count}-record prefix"
            );
        }
        db.close().unwrap();
    }
}

#[test]
fn torn_transaction_is_rolled_back_on_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bank.aol");

    // A committed transaction followed by one that never commits, as a
    // crash mid-commit would leave it.
    {
        let storage = AolStorage::new(path.clone(), None, true, 100, Duration::ZERO);
        storage.initialize().unwrap();

        let mut alice = lmcs_core::Document::new();
        alice.insert("_id".into(), json!("alice"));
        alice.insert("balance".into(), json!(1000));

        storage.append(LogEntry::begin("tx-good")).unwrap();
        storage
            .append(LogEntry::insert("accounts", "alice", alice).with_tx("tx-good"))
            .unwrap();
        storage.append(LogEntry::commit("tx-good")).unwrap();

        let mut mallory = lmcs_core::Document::new();
        mallory.insert("_id".into(), json!("mallory"));
        mallory.insert("balance".into(), json!(1_000_000));

        storage.append(LogEntry::begin("tx-torn")).unwrap();
        storage
            .append(LogEntry::insert("accounts", "mallory", mallory).with_tx("tx-torn"))
            .unwrap();
        storage.close().unwrap();
    }

    let db = open(aol_config(dir.path(), "bank"));
    let accounts = db.collection("accounts").unwrap();

    // The committed transaction is visible, the torn one has no effects.
    assert!(accounts.find_one(&json!({"_id": "alice"})).is_some());
    assert!(accounts.find_one(&json!({"_id": "mallory"})).is_none());
    db.close().unwrap();

    // Recovery stamped a synthetic ROLLBACK for the torn transaction.
    let content = fs::read_to_string(&path).unwrap();
    let rollbacks: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|entry| entry["op"] == json!("ROLLBACK"))
        .collect();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0]["id"], json!("tx-torn"));
}

#[test]
fn rolled_back_transaction_stays_invisible_across_reopens() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "bank");

    {
        let db = open(config.clone());
        db.collection("accounts")
            .unwrap()
            .insert(json!({"_id": "A", "balance": 100}))
            .unwrap();
        let result: lmcs_core::CoreResult<()> = db.transaction(|ctx| {
            ctx.update("accounts", &json!({"_id": "A"}), &json!({"balance": 0}))?;
            ctx.insert("accounts", json!({"_id": "B", "balance": 1}))?;
            Err(lmcs_core::CoreError::validation("abort"))
        });
        assert!(result.is_err());
        db.close().unwrap();
    }

    let db = open(config);
    let accounts = db.collection("accounts").unwrap();
    assert_eq!(
        accounts.find_one(&json!({"_id": "A"})).unwrap()["balance"],
        json!(100)
    );
    assert!(accounts.find_one(&json!({"_id": "B"})).is_none());
}

#[test]
fn committed_transaction_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "bank");

    {
        let db = open(config.clone());
        db.transaction(|ctx| {
            ctx.insert("accounts", json!({"_id": "A", "balance": 10}))?;
            ctx.insert("accounts", json!({"_id": "B", "balance": 20}))?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();
    }

    let db = open(config);
    let accounts = db.collection("accounts").unwrap();
    assert_eq!(accounts.count(), 2);
    assert_eq!(
        accounts.find_one(&json!({"_id": "B"})).unwrap()["balance"],
        json!(20)
    );
}

#[test]
fn compaction_preserves_recoverability() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "journal");

    {
        let db = open(config.clone());
        let entries = db.collection("entries").unwrap();
        for n in 0..50 {
            entries.insert(json!({"_id": format!("{n}"), "n": n})).unwrap();
        }
        for n in 0..25 {
            entries.remove(&json!({"_id": format!("{n}")})).unwrap();
        }
        db.compact().unwrap();
        db.close().unwrap();
    }

    let db = open(config);
    let entries = db.collection("entries").unwrap();
    assert_eq!(entries.count(), 25);
    assert!(entries.find_one(&json!({"_id": "30"})).is_some());
    assert!(entries.find_one(&json!({"_id": "10"})).is_none());
}
