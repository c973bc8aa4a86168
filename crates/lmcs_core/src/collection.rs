//! In-memory collection mirror.
//!
//! A collection holds the live data map for one named set of documents,
//! keeps its indexes current, and writes every mutation to storage
//! *before* touching in-memory state, so a crash between the two leaves
//! a log that replays back to a consistent view.

use crate::document::{next_document_id, Document, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexManager};
use crate::query::{apply_post_filter, matches, FindOptions};
use lmcs_codec::LogEntry;
use lmcs_storage::Storage;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Validates a raw document value and resolves its id.
///
/// Generates a time-ordered id when `_id` is absent; a present `_id`
/// must be a string.
pub(crate) fn normalize_document(doc: Value) -> CoreResult<(String, Document)> {
    let Value::Object(mut doc) = doc else {
        return Err(CoreError::validation("document must be a JSON object"));
    };
    let id = match doc.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(_) => {
            return Err(CoreError::validation(format!(
                "{ID_FIELD} must be a non-empty string"
            )))
        }
        None => {
            let id = next_document_id();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    };
    Ok((id, doc))
}

/// A named set of documents keyed by `_id`.
///
/// Handles are cheap to clone (`Arc` inside the database) and safe to
/// use from multiple threads; writes are serialized by the storage
/// append chain.
pub struct Collection {
    name: String,
    storage: Arc<dyn Storage>,
    indexes: Arc<IndexManager>,
    data: RwLock<HashMap<String, Document>>,
}

impl Collection {
    pub(crate) fn new(name: String, storage: Arc<dyn Storage>, indexes: Arc<IndexManager>) -> Self {
        Self {
            name,
            storage,
            indexes,
            data: RwLock::new(HashMap::new()),
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of documents in the collection.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.read().len()
    }

    /// Inserts a document, assigning an id when `_id` is absent.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-object documents, duplicate
    /// ids, and unique-index violations; storage errors propagate.
    pub fn insert(&self, doc: Value) -> CoreResult<String> {
        let (id, doc) = normalize_document(doc)?;
        if self.data.read().contains_key(&id) {
            return Err(CoreError::validation(format!(
                "duplicate document id {id:?} in collection {:?}",
                self.name
            )));
        }
        self.indexes.check_unique(&self.name, &id, &doc)?;

        self.storage
            .append(LogEntry::insert(&self.name, &id, doc.clone()))?;
        self.apply_upsert(&id, doc);
        Ok(id)
    }

    /// Updates every document matching `filter` by shallow-merging
    /// `updates` into it. `_id` is always preserved.
    ///
    /// Returns the number of documents updated.
    pub fn update(&self, filter: &Value, updates: &Value) -> CoreResult<usize> {
        let Some(updates) = updates.as_object() else {
            return Err(CoreError::validation("updates must be a JSON object"));
        };

        // Materialize matches up front so mutation never races iteration.
        let matched = self.matching_documents(filter);
        let mut count = 0;
        for (id, old) in matched {
            let merged = merge_shallow(&old, updates, &id);
            self.indexes.check_unique(&self.name, &id, &merged)?;
            self.storage
                .append(LogEntry::update(&self.name, &id, merged.clone()))?;
            self.apply_upsert(&id, merged);
            count += 1;
        }
        Ok(count)
    }

    /// Removes every document matching `filter`.
    ///
    /// Returns the number of documents removed.
    pub fn remove(&self, filter: &Value) -> CoreResult<usize> {
        let matched = self.matching_documents(filter);
        let mut count = 0;
        for (id, _) in matched {
            self.storage.append(LogEntry::delete(&self.name, &id))?;
            self.apply_delete(&id);
            count += 1;
        }
        Ok(count)
    }

    /// Returns the first document matching `filter`, if any.
    ///
    /// Indexes are consulted first; without an applicable index the
    /// collection is scanned linearly.
    #[must_use]
    pub fn find_one(&self, filter: &Value) -> Option<Value> {
        let data = self.data.read();
        if let Some(map) = filter.as_object() {
            if let Some(ids) = self.indexes.query_by_index(&self.name, map) {
                return ids
                    .iter()
                    .filter_map(|id| data.get(id))
                    .find(|doc| matches(doc, filter))
                    .map(|doc| Value::Object(doc.clone()));
            }
        }
        data.values()
            .find(|doc| matches(doc, filter))
            .map(|doc| Value::Object(doc.clone()))
    }

    /// Returns all matching documents, with sort, skip, and limit
    /// applied in that order.
    #[must_use]
    pub fn find_all(&self, options: &FindOptions) -> Vec<Value> {
        let filter = options
            .filter
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let matched: Vec<Document> = self
            .candidates(&filter)
            .into_iter()
            .filter(|doc| matches(doc, &filter))
            .collect();
        apply_post_filter(matched, options)
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    /// Streams matching documents lazily.
    ///
    /// Candidates are snapshotted so the iterator never observes
    /// concurrent mutation; filtering, skip, and limit stay lazy. A sort
    /// specification forces full materialization, collapsing to
    /// [`Collection::find_all`].
    #[must_use]
    pub fn find_stream(&self, options: FindOptions) -> Box<dyn Iterator<Item = Value> + Send> {
        if !options.sort.is_empty() {
            return Box::new(self.find_all(&options).into_iter());
        }
        let filter = options
            .filter
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let candidates = self.candidates(&filter);
        let limit = options.limit.unwrap_or(usize::MAX);
        Box::new(
            candidates
                .into_iter()
                .filter(move |doc| matches(doc, &filter))
                .skip(options.skip)
                .take(limit)
                .map(Value::Object),
        )
    }

    /// Registers an index and backfills it from existing documents.
    ///
    /// A unique violation during backfill unwinds the registration.
    pub fn create_index(&self, definition: IndexDefinition) -> CoreResult<()> {
        let name = definition.name();
        self.indexes.create_index(&self.name, definition)?;

        let snapshot = self.snapshot();
        for (id, doc) in &snapshot {
            if let Err(e) = self.indexes.index_document(&self.name, id, doc) {
                self.indexes.drop_index(&self.name, &name);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Registered index definitions.
    #[must_use]
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes.definitions(&self.name)
    }

    /// Clones the full data map (used for transactional overlays).
    pub(crate) fn snapshot(&self) -> HashMap<String, Document> {
        self.data.read().clone()
    }

    /// Applies an insert-or-replace to in-memory state and indexes,
    /// without writing to storage. Used by replay and commit apply.
    ///
    /// Unique constraints are enforced at stage time by every write
    /// path (direct writes pre-check against the live indexes,
    /// transactional writes against the overlaid pending view), so by
    /// the time an entry reaches this method it has already been
    /// validated. The only way `index_document` can still object is
    /// replaying a log against an index created after those entries
    /// were written; the entry is authoritative then, so the data map
    /// is updated and the conflict logged.
    pub(crate) fn apply_upsert(&self, id: &str, doc: Document) {
        if let Some(old) = self.data.read().get(id) {
            self.indexes.remove_document(&self.name, id, old);
        }
        if let Err(e) = self.indexes.index_document(&self.name, id, &doc) {
            warn!(
                collection = %self.name,
                id,
                error = %e,
                "replayed document conflicts with a current index"
            );
        }
        self.data.write().insert(id.to_string(), doc);
    }

    /// Removes a document from in-memory state and indexes, without
    /// writing to storage.
    pub(crate) fn apply_delete(&self, id: &str) -> Option<Document> {
        let removed = self.data.write().remove(id);
        if let Some(doc) = &removed {
            self.indexes.remove_document(&self.name, id, doc);
        }
        removed
    }

    /// Applies a replayed log entry to in-memory state.
    pub(crate) fn apply_entry(&self, entry: &LogEntry) {
        if entry.is_envelope() {
            return;
        }
        match entry.op {
            lmcs_codec::Operation::Insert | lmcs_codec::Operation::Update => {
                if let Some(data) = &entry.data {
                    self.apply_upsert(&entry.id, data.clone());
                } else {
                    warn!(
                        collection = %self.name,
                        id = %entry.id,
                        "replayed write entry has no payload; skipping"
                    );
                }
            }
            lmcs_codec::Operation::Delete => {
                self.apply_delete(&entry.id);
            }
            _ => {}
        }
    }

    /// Candidate documents for a filter: an index-driven subset when one
    /// applies, the whole collection otherwise.
    fn candidates(&self, filter: &Value) -> Vec<Document> {
        let data = self.data.read();
        if let Some(map) = filter.as_object() {
            if let Some(ids) = self.indexes.query_by_index(&self.name, map) {
                return ids.iter().filter_map(|id| data.get(id).cloned()).collect();
            }
        }
        data.values().cloned().collect()
    }

    /// Materializes `(id, document)` pairs matching a filter.
    fn matching_documents(&self, filter: &Value) -> Vec<(String, Document)> {
        self.candidates(filter)
            .into_iter()
            .filter(|doc| matches(doc, filter))
            .filter_map(|doc| {
                let id = doc.get(ID_FIELD)?.as_str()?.to_string();
                Some((id, doc))
            })
            .collect()
    }
}

/// Shallow merge: every update field overwrites the old value; `_id` is
/// forced back to the document's identity afterwards.
fn merge_shallow(old: &Document, updates: &Map<String, Value>, id: &str) -> Document {
    let mut merged = old.clone();
    for (key, value) in updates {
        merged.insert(key.clone(), value.clone());
    }
    merged.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    merged
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("documents", &self.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use lmcs_storage::MemoryStorage;
    use serde_json::json;

    fn collection() -> Collection {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.initialize().unwrap();
        Collection::new("users".into(), storage, Arc::new(IndexManager::new()))
    }

    #[test]
    fn insert_assigns_id() {
        let users = collection();
        let id = users.insert(json!({"name": "Alice"})).unwrap();
        assert!(!id.is_empty());

        let found = users.find_one(&json!({"name": "Alice"})).unwrap();
        assert_eq!(found["_id"], json!(id));
    }

    #[test]
    fn insert_respects_given_id() {
        let users = collection();
        let id = users.insert(json!({"_id": "u-1", "name": "Bob"})).unwrap();
        assert_eq!(id, "u-1");
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let users = collection();
        users.insert(json!({"_id": "u-1"})).unwrap();
        let err = users.insert(json!({"_id": "u-1"})).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(users.count(), 1);
    }

    #[test]
    fn insert_rejects_non_object() {
        let users = collection();
        assert!(users.insert(json!([1, 2, 3])).is_err());
        assert!(users.insert(json!("nope")).is_err());
    }

    #[test]
    fn insert_rejects_non_string_id() {
        let users = collection();
        assert!(users.insert(json!({"_id": 7})).is_err());
    }

    #[test]
    fn generated_ids_are_time_ordered() {
        let users = collection();
        let a = users.insert(json!({"n": 1})).unwrap();
        let b = users.insert(json!({"n": 2})).unwrap();
        assert!(a < b);
    }

    #[test]
    fn update_merges_and_preserves_id() {
        let users = collection();
        users
            .insert(json!({"_id": "u-1", "name": "Alice", "age": 30}))
            .unwrap();

        let count = users
            .update(&json!({"_id": "u-1"}), &json!({"age": 31, "_id": "evil"}))
            .unwrap();
        assert_eq!(count, 1);

        let doc = users.find_one(&json!({"_id": "u-1"})).unwrap();
        assert_eq!(doc["age"], json!(31));
        assert_eq!(doc["name"], json!("Alice"));
        assert_eq!(doc["_id"], json!("u-1"));
    }

    #[test]
    fn update_matches_many() {
        let users = collection();
        for i in 0..5 {
            users.insert(json!({"group": i % 2, "n": i})).unwrap();
        }
        let count = users
            .update(&json!({"group": 0}), &json!({"flagged": true}))
            .unwrap();
        assert_eq!(count, 3);
        let flagged = users.find_all(&FindOptions::new().filter(json!({"flagged": true})));
        assert_eq!(flagged.len(), 3);
    }

    #[test]
    fn remove_deletes_matches() {
        let users = collection();
        users.insert(json!({"_id": "a", "keep": false})).unwrap();
        users.insert(json!({"_id": "b", "keep": true})).unwrap();

        let count = users.remove(&json!({"keep": false})).unwrap();
        assert_eq!(count, 1);
        assert_eq!(users.count(), 1);
        assert!(users.find_one(&json!({"_id": "a"})).is_none());
    }

    #[test]
    fn writes_reach_storage_before_memory() {
        let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());
        storage.initialize().unwrap();
        let users = Collection::new(
            "users".into(),
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::new(IndexManager::new()),
        );

        users.insert(json!({"_id": "a"})).unwrap();
        users.update(&json!({"_id": "a"}), &json!({"n": 1})).unwrap();
        users.remove(&json!({"_id": "a"})).unwrap();

        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn find_all_sort_skip_limit() {
        let users = collection();
        for i in 0..10 {
            users.insert(json!({"n": i})).unwrap();
        }
        let options = FindOptions::new()
            .sort_by("n", SortDirection::Descending)
            .skip(1)
            .limit(2);
        let result = users.find_all(&options);
        let ns: Vec<i64> = result.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [8, 7]);
    }

    #[test]
    fn find_stream_is_lazy_without_sort() {
        let users = collection();
        for i in 0..100 {
            users.insert(json!({"n": i})).unwrap();
        }
        let mut stream = users.find_stream(FindOptions::new().filter(json!({"n": {"$gte": 50}})));
        let first = stream.next().unwrap();
        assert!(first["n"].as_i64().unwrap() >= 50);
    }

    #[test]
    fn find_stream_with_sort_is_ordered() {
        let users = collection();
        for n in [3, 1, 2] {
            users.insert(json!({"n": n})).unwrap();
        }
        let ns: Vec<i64> = users
            .find_stream(FindOptions::new().sort_by("n", SortDirection::Ascending))
            .map(|d| d["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, [1, 2, 3]);
    }

    #[test]
    fn unique_index_blocks_insert() {
        let users = collection();
        users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap();
        users.insert(json!({"email": "a@x.com"})).unwrap();

        let err = users.insert(json!({"email": "a@x.com"})).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        // Neither the data map nor the index was mutated.
        assert_eq!(users.count(), 1);
    }

    #[test]
    fn unique_index_blocks_update_into_collision() {
        let users = collection();
        users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap();
        users.insert(json!({"_id": "a", "email": "a@x.com"})).unwrap();
        users.insert(json!({"_id": "b", "email": "b@x.com"})).unwrap();

        let err = users
            .update(&json!({"_id": "b"}), &json!({"email": "a@x.com"}))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        let b = users.find_one(&json!({"_id": "b"})).unwrap();
        assert_eq!(b["email"], json!("b@x.com"));
    }

    #[test]
    fn update_to_same_unique_value_is_allowed() {
        let users = collection();
        users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap();
        users.insert(json!({"_id": "a", "email": "a@x.com"})).unwrap();

        let count = users
            .update(&json!({"_id": "a"}), &json!({"age": 1}))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn create_index_backfills_existing_documents() {
        let users = collection();
        users.insert(json!({"city": "oslo"})).unwrap();
        users.insert(json!({"city": "bergen"})).unwrap();
        users
            .create_index(IndexDefinition::new(vec!["city".into()]))
            .unwrap();

        let found = users.find_one(&json!({"city": "oslo"})).unwrap();
        assert_eq!(found["city"], json!("oslo"));
    }

    #[test]
    fn create_index_unwinds_on_backfill_violation() {
        let users = collection();
        users.insert(json!({"email": "dup@x.com"})).unwrap();
        users.insert(json!({"email": "dup@x.com"})).unwrap();

        let err = users
            .create_index(IndexDefinition::new(vec!["email".into()]).unique())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert!(users.index_definitions().is_empty());
    }

    #[test]
    fn index_and_scan_agree() {
        let users = collection();
        users
            .create_index(IndexDefinition::new(vec!["city".into()]))
            .unwrap();
        for (id, city) in [("1", "oslo"), ("2", "bergen"), ("3", "oslo")] {
            users.insert(json!({"_id": id, "city": city})).unwrap();
        }

        let indexed = users.find_all(&FindOptions::new().filter(json!({"city": "oslo"})));
        assert_eq!(indexed.len(), 2);

        // A non-indexed field takes the linear path and agrees.
        let scanned = users.find_all(&FindOptions::new().filter(json!({"_id": "1"})));
        assert_eq!(scanned.len(), 1);
    }
}
