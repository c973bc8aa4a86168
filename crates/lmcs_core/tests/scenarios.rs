//! End-to-end scenarios across the database surface.

use lmcs_core::{
    Database, DatabaseConfig, FindOptions, IndexDefinition, SortDirection, StorageType,
};
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;

fn open(config: DatabaseConfig) -> Database {
    let db = Database::new(config).unwrap();
    db.initialize().unwrap();
    db
}

fn aol_config(dir: &std::path::Path, name: &str) -> DatabaseConfig {
    DatabaseConfig::new(StorageType::Aol)
        .database_name(name)
        .custom_path(dir)
        .compaction_interval(Duration::ZERO)
}

#[test]
fn simple_crud_in_memory() {
    let db = open(DatabaseConfig::new(StorageType::Memory));
    let users = db.collection("users").unwrap();

    users.insert(json!({"name": "Alice", "age": 30})).unwrap();
    let alice = users.find_one(&json!({"name": "Alice"})).unwrap();
    assert_eq!(alice["age"], json!(30));

    users
        .update(&json!({"name": "Alice"}), &json!({"age": 31}))
        .unwrap();
    let alice = users.find_one(&json!({"name": "Alice"})).unwrap();
    assert_eq!(alice["age"], json!(31));

    users.remove(&json!({"name": "Alice"})).unwrap();
    assert!(users.find_one(&json!({"name": "Alice"})).is_none());
}

#[test]
fn query_operator_scenario() {
    let db = open(DatabaseConfig::new(StorageType::Memory));
    let products = db.collection("products").unwrap();

    for (name, category, price) in [
        ("gum", "food", 1),
        ("soda", "food", 2),
        ("keyboard", "tech", 999),
        ("monitor", "tech", 1999),
        ("laptop", "tech", 20000),
    ] {
        products
            .insert(json!({"name": name, "category": category, "price": price}))
            .unwrap();
    }

    let expensive = products.find_all(&FindOptions::new().filter(json!({"price": {"$gt": 1000}})));
    assert_eq!(expensive.len(), 2);

    let union = products.find_all(&FindOptions::new().filter(json!({
        "$or": [{"category": "food"}, {"price": {"$gt": 1500}}]
    })));
    assert_eq!(union.len(), 4);

    let cheap_sorted = products.find_all(
        &FindOptions::new()
            .filter(json!({"price": {"$lte": 999}}))
            .sort_by("price", SortDirection::Descending),
    );
    let prices: Vec<i64> = cheap_sorted
        .iter()
        .map(|p| p["price"].as_i64().unwrap())
        .collect();
    assert_eq!(prices, [999, 2, 1]);
}

#[test]
fn transaction_rollback_scenario() {
    let dir = tempdir().unwrap();
    let db = open(aol_config(dir.path(), "bank"));
    let accounts = db.collection("accounts").unwrap();
    accounts
        .insert(json!({"_id": "A", "balance": 100}))
        .unwrap();

    let result: lmcs_core::CoreResult<()> = db.transaction(|ctx| {
        ctx.update("accounts", &json!({"_id": "A"}), &json!({"balance": 0}))?;
        Err(lmcs_core::CoreError::validation("forced failure"))
    });
    assert!(result.is_err());

    let account = accounts.find_one(&json!({"_id": "A"})).unwrap();
    assert_eq!(account["balance"], json!(100));
}

#[test]
fn transfer_commit_scenario() {
    let dir = tempdir().unwrap();
    let db = open(aol_config(dir.path(), "bank"));
    let accounts = db.collection("accounts").unwrap();
    accounts
        .insert(json!({"_id": "alice", "balance": 1000}))
        .unwrap();
    accounts
        .insert(json!({"_id": "bob", "balance": 500}))
        .unwrap();

    db.transaction(|ctx| {
        ctx.update("accounts", &json!({"_id": "alice"}), &json!({"balance": 900}))?;
        ctx.update("accounts", &json!({"_id": "bob"}), &json!({"balance": 600}))?;
        Ok(())
    })
    .unwrap();

    let alice = accounts.find_one(&json!({"_id": "alice"})).unwrap();
    let bob = accounts.find_one(&json!({"_id": "bob"})).unwrap();
    assert_eq!(alice["balance"], json!(900));
    assert_eq!(bob["balance"], json!(600));

    // The log holds BEGIN, two tagged UPDATEs, COMMIT, in that order.
    db.flush().unwrap();
    let content = std::fs::read_to_string(dir.path().join("bank.aol")).unwrap();
    let entries: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let tail = &entries[entries.len() - 4..];

    assert_eq!(tail[0]["op"], json!("BEGIN"));
    assert_eq!(tail[1]["op"], json!("UPDATE"));
    assert_eq!(tail[2]["op"], json!("UPDATE"));
    assert_eq!(tail[3]["op"], json!("COMMIT"));

    let tx_id = tail[0]["id"].as_str().unwrap();
    assert_eq!(tail[1]["txId"], json!(tx_id));
    assert_eq!(tail[2]["txId"], json!(tx_id));
    assert_eq!(tail[3]["id"], json!(tx_id));
}

#[test]
fn compaction_collapse_scenario() {
    let dir = tempdir().unwrap();
    {
        let db = open(aol_config(dir.path(), "events"));
        let events = db.collection("events").unwrap();
        events.insert(json!({"_id": "1", "state": "new"})).unwrap();
        events
            .update(&json!({"_id": "1"}), &json!({"state": "started"}))
            .unwrap();
        events
            .update(&json!({"_id": "1"}), &json!({"state": "done"}))
            .unwrap();
        events.remove(&json!({"_id": "1"})).unwrap();
        events.insert(json!({"_id": "2", "state": "new"})).unwrap();

        db.compact().unwrap();

        let content = std::fs::read_to_string(dir.path().join("events.aol")).unwrap();
        assert_eq!(content.lines().count(), 1);
        db.close().unwrap();
    }

    let db = open(aol_config(dir.path(), "events"));
    let events = db.collection("events").unwrap();
    assert_eq!(events.count(), 1);
    assert!(events.find_one(&json!({"_id": "2"})).is_some());
}

#[test]
fn close_then_initialize_preserves_data() {
    let dir = tempdir().unwrap();
    for (storage_type, name) in [
        (StorageType::Json, "snap"),
        (StorageType::Binary, "bin"),
        (StorageType::Aol, "log"),
    ] {
        let config = DatabaseConfig::new(storage_type)
            .database_name(name)
            .custom_path(dir.path())
            .autosave_interval(Duration::ZERO)
            .compaction_interval(Duration::ZERO);

        {
            let db = open(config.clone());
            let items = db.collection("items").unwrap();
            items.insert(json!({"_id": "x", "n": 1})).unwrap();
            items.insert(json!({"_id": "y", "n": 2})).unwrap();
            db.close().unwrap();
        }

        let db = open(config);
        let items = db.collection("items").unwrap();
        assert_eq!(items.count(), 2, "backend {storage_type:?}");
        let x = items.find_one(&json!({"_id": "x"})).unwrap();
        assert_eq!(x["n"], json!(1));
        db.close().unwrap();
    }
}

#[test]
fn encrypted_database_roundtrip() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "vault").encryption_key("correct horse");

    {
        let db = open(config.clone());
        db.collection("secrets")
            .unwrap()
            .insert(json!({"_id": "s", "value": "classified"}))
            .unwrap();
        db.close().unwrap();
    }

    // On-disk lines are envelopes; the plaintext never appears.
    let content = std::fs::read_to_string(dir.path().join("vault.aol")).unwrap();
    assert!(!content.contains("classified"));

    let db = open(config);
    let secret = db
        .collection("secrets")
        .unwrap()
        .find_one(&json!({"_id": "s"}))
        .unwrap();
    assert_eq!(secret["value"], json!("classified"));
}

#[test]
fn wrong_key_reopens_empty() {
    let dir = tempdir().unwrap();

    {
        let db = open(aol_config(dir.path(), "vault").encryption_key("correct"));
        db.collection("secrets")
            .unwrap()
            .insert(json!({"_id": "s"}))
            .unwrap();
        db.close().unwrap();
    }

    let db = open(aol_config(dir.path(), "vault").encryption_key("wrong"));
    assert_eq!(db.collection("secrets").unwrap().count(), 0);
}

#[test]
fn file_lock_excludes_second_database() {
    let dir = tempdir().unwrap();
    let db = open(aol_config(dir.path(), "solo"));

    let second = Database::new(aol_config(dir.path(), "solo")).unwrap();
    let err = second.initialize().unwrap_err();
    assert_eq!(err.code(), "LOCK");

    db.close().unwrap();

    // Released lock allows a fresh open.
    let third = Database::new(aol_config(dir.path(), "solo")).unwrap();
    third.initialize().unwrap();
}

#[test]
fn unique_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "users");

    {
        let db = open(config.clone());
        let users = db.collection("users").unwrap();
        users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap();
        users
            .insert(json!({"_id": "a", "email": "a@x.com"}))
            .unwrap();
        db.close().unwrap();
    }

    // Index definitions are in-memory; re-create after reopen and the
    // backfilled data still enforces uniqueness.
    let db = open(config);
    let users = db.collection("users").unwrap();
    users
        .create_index(IndexDefinition::new(vec!["email".into()]).unique())
        .unwrap();
    let err = users
        .insert(json!({"_id": "b", "email": "a@x.com"}))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn unique_collision_inside_transaction_rolls_back() {
    let dir = tempdir().unwrap();
    let config = aol_config(dir.path(), "members");

    {
        let db = open(config.clone());
        let users = db.collection("users").unwrap();
        users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap();

        // Two staged inserts with distinct ids but the same unique
        // value must fail at stage time and roll the scope back.
        let result: lmcs_core::CoreResult<()> = db.transaction(|ctx| {
            ctx.insert("users", json!({"_id": "a", "email": "dup@x.com"}))?;
            ctx.insert("users", json!({"_id": "b", "email": "dup@x.com"}))?;
            Ok(())
        });
        assert_eq!(result.unwrap_err().code(), "VALIDATION");
        assert_eq!(users.count(), 0);
        db.close().unwrap();
    }

    // Nothing from the aborted scope survives a reopen either.
    let db = open(config);
    assert_eq!(db.collection("users").unwrap().count(), 0);
}

#[test]
fn updates_inside_and_outside_transactions_interleave() {
    let dir = tempdir().unwrap();
    let db = open(aol_config(dir.path(), "mixed"));
    let items = db.collection("items").unwrap();

    items.insert(json!({"_id": "a", "n": 0})).unwrap();
    db.transaction(|ctx| {
        ctx.update("items", &json!({"_id": "a"}), &json!({"n": 1}))?;
        ctx.insert("items", json!({"_id": "b", "n": 2}))?;
        Ok(())
    })
    .unwrap();
    items.update(&json!({"_id": "b"}), &json!({"n": 3})).unwrap();

    assert_eq!(
        items.find_one(&json!({"_id": "a"})).unwrap()["n"],
        json!(1)
    );
    assert_eq!(
        items.find_one(&json!({"_id": "b"})).unwrap()["n"],
        json!(3)
    );

    let stats = db.stats().unwrap();
    assert_eq!(stats.documents, 2);
}
