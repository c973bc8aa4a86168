//! Hash indexes with unique-constraint enforcement.

use crate::document::{lookup_path, Document};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Definition of one index over one or more document fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Indexed fields as dot-paths, in key order.
    pub fields: Vec<String>,
    /// Reject two documents sharing the same defined key.
    pub unique: bool,
    /// Skip documents where any component is undefined.
    pub sparse: bool,
}

impl IndexDefinition {
    /// Creates a plain (non-unique, non-sparse) definition.
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            unique: false,
            sparse: false,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index sparse.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Derived index name: `field1:field2:…`.
    #[must_use]
    pub fn name(&self) -> String {
        self.fields.join(":")
    }

    /// Computes the fingerprint key for a document.
    ///
    /// The key is the canonical JSON of the ordered component array.
    /// Returns `None` when the index is sparse and any component is
    /// undefined; non-sparse indexes substitute JSON `null`.
    pub(crate) fn fingerprint(&self, doc: &Document) -> Option<String> {
        let mut components = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match lookup_path(doc, field) {
                Some(value) => components.push(value.clone()),
                None if self.sparse => return None,
                None => components.push(Value::Null),
            }
        }
        serde_json::to_string(&Value::Array(components)).ok()
    }
}

/// One live index: definition plus fingerprint → id-set map.
#[derive(Debug)]
struct IndexState {
    definition: IndexDefinition,
    entries: HashMap<String, HashSet<String>>,
}

/// Per-collection hash indexes.
///
/// Fingerprint keys map to sets of document ids. Unique violations are
/// detected before any mutation, so a failed insert leaves every index
/// untouched.
#[derive(Debug, Default)]
pub struct IndexManager {
    collections: RwLock<HashMap<String, HashMap<String, IndexState>>>,
}

impl IndexManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty field lists or when an index
    /// with the same derived name already exists.
    pub fn create_index(&self, collection: &str, definition: IndexDefinition) -> CoreResult<()> {
        if definition.fields.is_empty() {
            return Err(CoreError::validation("index requires at least one field"));
        }
        let name = definition.name();
        let mut collections = self.collections.write();
        let indexes = collections.entry(collection.to_string()).or_default();
        if indexes.contains_key(&name) {
            return Err(CoreError::validation(format!(
                "index {name:?} already exists on collection {collection:?}"
            )));
        }
        indexes.insert(
            name,
            IndexState {
                definition,
                entries: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Drops an index registration and its entries.
    ///
    /// Returns whether an index with that name existed.
    pub fn drop_index(&self, collection: &str, name: &str) -> bool {
        let mut collections = self.collections.write();
        collections
            .get_mut(collection)
            .map(|indexes| indexes.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Checks every unique index for a violation the document would
    /// introduce, without mutating anything.
    ///
    /// `id` is the id the document is (or will be) stored under, so a
    /// document may always collide with itself.
    pub fn check_unique(&self, collection: &str, id: &str, doc: &Document) -> CoreResult<()> {
        let collections = self.collections.read();
        let Some(indexes) = collections.get(collection) else {
            return Ok(());
        };
        for state in indexes.values() {
            if !state.definition.unique {
                continue;
            }
            let Some(key) = state.definition.fingerprint(doc) else {
                continue;
            };
            if let Some(ids) = state.entries.get(&key) {
                if ids.iter().any(|existing| existing != id) {
                    return Err(CoreError::validation(format!(
                        "unique index {:?} violated by value {key} in collection {collection:?}",
                        state.definition.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks unique constraints for a candidate document against a
    /// caller-supplied document set instead of the live index maps.
    ///
    /// Transactional staging uses this with the committed state overlaid
    /// with the transaction's own pending writes, so a collision between
    /// two staged writes is caught before anything commits.
    pub fn check_unique_in(
        &self,
        collection: &str,
        id: &str,
        doc: &Document,
        docs: &HashMap<String, Document>,
    ) -> CoreResult<()> {
        let collections = self.collections.read();
        let Some(indexes) = collections.get(collection) else {
            return Ok(());
        };
        for state in indexes.values() {
            let definition = &state.definition;
            if !definition.unique {
                continue;
            }
            let Some(key) = definition.fingerprint(doc) else {
                continue;
            };
            for (other_id, other) in docs {
                if other_id == id {
                    continue;
                }
                if definition.fingerprint(other).as_deref() == Some(key.as_str()) {
                    return Err(CoreError::validation(format!(
                        "unique index {:?} violated by value {key} in collection {collection:?}",
                        definition.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Adds a document to every index of its collection.
    ///
    /// Unique constraints are re-verified before any index is touched.
    pub fn index_document(&self, collection: &str, id: &str, doc: &Document) -> CoreResult<()> {
        self.check_unique(collection, id, doc)?;
        let mut collections = self.collections.write();
        let Some(indexes) = collections.get_mut(collection) else {
            return Ok(());
        };
        for state in indexes.values_mut() {
            if let Some(key) = state.definition.fingerprint(doc) {
                state
                    .entries
                    .entry(key)
                    .or_default()
                    .insert(id.to_string());
            }
        }
        Ok(())
    }

    /// Removes a document from every index of its collection.
    pub fn remove_document(&self, collection: &str, id: &str, doc: &Document) {
        let mut collections = self.collections.write();
        let Some(indexes) = collections.get_mut(collection) else {
            return;
        };
        for state in indexes.values_mut() {
            if let Some(key) = state.definition.fingerprint(doc) {
                if let Some(ids) = state.entries.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        state.entries.remove(&key);
                    }
                }
            }
        }
    }

    /// Computes candidate ids for a filter using any applicable indexes.
    ///
    /// Equality, `$eq`, and `$in` predicates are index-accelerated;
    /// candidate sets from all applicable indexes are intersected.
    /// Returns `None` when no index applies, in which case the caller
    /// falls back to a linear scan.
    #[must_use]
    pub fn query_by_index(
        &self,
        collection: &str,
        filter: &serde_json::Map<String, Value>,
    ) -> Option<HashSet<String>> {
        let equalities = equality_predicates(filter);
        if equalities.is_empty() {
            return None;
        }

        let collections = self.collections.read();
        let indexes = collections.get(collection)?;

        let mut candidates: Option<HashSet<String>> = None;
        for state in indexes.values() {
            let Some(ids) = index_candidates(state, &equalities) else {
                continue;
            };
            candidates = Some(match candidates {
                None => ids,
                Some(current) => current.intersection(&ids).cloned().collect(),
            });
        }
        candidates
    }

    /// Number of indexes registered for a collection.
    #[must_use]
    pub fn index_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Registered definitions for a collection.
    #[must_use]
    pub fn definitions(&self, collection: &str) -> Vec<IndexDefinition> {
        self.collections
            .read()
            .get(collection)
            .map(|indexes| {
                indexes
                    .values()
                    .map(|state| state.definition.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An index-usable predicate: one exact value or an `$in` alternative set.
enum Predicate<'a> {
    Eq(&'a Value),
    In(&'a [Value]),
}

/// Collects the equality-shaped predicates of a filter's top level.
fn equality_predicates<'a>(
    filter: &'a serde_json::Map<String, Value>,
) -> HashMap<&'a str, Predicate<'a>> {
    let mut predicates = HashMap::new();
    for (field, condition) in filter {
        if field.starts_with('$') {
            continue;
        }
        match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                if let Some(value) = ops.get("$eq") {
                    predicates.insert(field.as_str(), Predicate::Eq(value));
                } else if let Some(Value::Array(values)) = ops.get("$in") {
                    predicates.insert(field.as_str(), Predicate::In(values));
                }
            }
            value => {
                predicates.insert(field.as_str(), Predicate::Eq(value));
            }
        }
    }
    predicates
}

/// Candidate ids from one index, when the filter pins all its fields.
fn index_candidates(
    state: &IndexState,
    equalities: &HashMap<&str, Predicate<'_>>,
) -> Option<HashSet<String>> {
    let definition = &state.definition;
    if !definition
        .fields
        .iter()
        .all(|field| equalities.contains_key(field.as_str()))
    {
        return None;
    }

    // $in fans out into one fingerprint per alternative; compound
    // indexes take the cartesian product across components.
    let mut keys: Vec<Vec<Value>> = vec![Vec::with_capacity(definition.fields.len())];
    for field in &definition.fields {
        let alternatives: Vec<&Value> = match &equalities[field.as_str()] {
            Predicate::Eq(value) => vec![*value],
            Predicate::In(values) => values.iter().collect(),
        };
        let mut next = Vec::with_capacity(keys.len() * alternatives.len());
        for prefix in &keys {
            for alt in &alternatives {
                let mut key = prefix.clone();
                key.push((*alt).clone());
                next.push(key);
            }
        }
        keys = next;
    }

    let mut ids = HashSet::new();
    for key in keys {
        let fingerprint = serde_json::to_string(&Value::Array(key)).ok()?;
        if let Some(matched) = state.entries.get(&fingerprint) {
            ids.extend(matched.iter().cloned());
        }
    }
    Some(ids)
}
