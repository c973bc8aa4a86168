//! Last-writer compaction fold.

use crate::error::StorageResult;
use lmcs_codec::{LogEntry, Operation};
use std::collections::HashMap;

/// Folds an entry history into last-writer state.
///
/// Entries are keyed `collection:id`. INSERT/UPDATE overwrite the slot,
/// DELETE removes it, and transaction envelopes are dropped entirely.
/// The surviving entries keep the order in which their keys first became
/// live.
pub(crate) fn fold_last_writer(
    entries: impl Iterator<Item = StorageResult<LogEntry>>,
) -> StorageResult<Vec<LogEntry>> {
    let mut state: HashMap<String, LogEntry> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in entries {
        let entry = entry?;
        if entry.is_envelope() {
            continue;
        }
        let key = format!("{}:{}", entry.collection, entry.id);
        match entry.op {
            Operation::Insert | Operation::Update => {
                if state.insert(key.clone(), entry).is_none() {
                    order.push(key);
                }
            }
            Operation::Delete => {
                if state.remove(&key).is_some() {
                    order.retain(|k| k != &key);
                }
            }
            _ => {}
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|key| state.remove(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: i64) -> lmcs_codec::Document {
        let mut d = lmcs_codec::Document::new();
        d.insert("v".into(), json!(v));
        d
    }

    fn ok_iter(entries: Vec<LogEntry>) -> impl Iterator<Item = StorageResult<LogEntry>> {
        entries.into_iter().map(Ok)
    }

    #[test]
    fn updates_collapse() {
        let entries = vec![
            LogEntry::insert("c", "1", doc(1)),
            LogEntry::update("c", "1", doc(2)),
            LogEntry::update("c", "1", doc(3)),
        ];
        let folded = fold_last_writer(ok_iter(entries)).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].data.as_ref().unwrap()["v"], json!(3));
    }

    #[test]
    fn delete_removes_slot() {
        let entries = vec![
            LogEntry::insert("c", "1", doc(1)),
            LogEntry::update("c", "1", doc(2)),
            LogEntry::delete("c", "1"),
            LogEntry::insert("c", "2", doc(9)),
        ];
        let folded = fold_last_writer(ok_iter(entries)).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].id, "2");
    }

    #[test]
    fn envelopes_dropped() {
        let entries = vec![
            LogEntry::begin("tx"),
            LogEntry::insert("c", "1", doc(1)),
            LogEntry::commit("tx"),
        ];
        let folded = fold_last_writer(ok_iter(entries)).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].op, Operation::Insert);
    }

    #[test]
    fn reinsert_after_delete_moves_to_end() {
        let entries = vec![
            LogEntry::insert("c", "1", doc(1)),
            LogEntry::insert("c", "2", doc(2)),
            LogEntry::delete("c", "1"),
            LogEntry::insert("c", "1", doc(3)),
        ];
        let folded = fold_last_writer(ok_iter(entries)).unwrap();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].id, "2");
        assert_eq!(folded[1].id, "1");
    }

    #[test]
    fn same_id_in_different_collections() {
        let entries = vec![
            LogEntry::insert("a", "1", doc(1)),
            LogEntry::insert("b", "1", doc(2)),
            LogEntry::delete("a", "1"),
        ];
        let folded = fold_last_writer(ok_iter(entries)).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].collection, "b");
    }

    #[test]
    fn empty_history() {
        let folded = fold_last_writer(ok_iter(vec![])).unwrap();
        assert!(folded.is_empty());
    }
}
