//! Filter language and find options.
//!
//! Filters are recursive JSON predicates: each key is either a logical
//! operator (`$or`, `$and`) or a document field path in dot notation.
//! A scalar field value means equality; an object value is a map of
//! comparison operators that must all hold.

use crate::document::{compare_values, lookup_path, Document};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction for one key of a sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Options for `find_all` / `find_stream`.
///
/// Applied in order: filter, sort, skip, limit.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Filter predicate; `None` matches every document.
    pub filter: Option<Value>,
    /// Sort keys, compared lexicographically in the given order.
    pub sort: Vec<(String, SortDirection)>,
    /// Number of leading results to drop.
    pub skip: usize,
    /// Maximum number of results to return.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Creates empty options (match everything, no ordering).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter predicate.
    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    /// Sets the number of leading results to drop.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum result count.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Evaluates a filter against a document.
///
/// A non-object filter matches nothing; an empty object matches
/// everything.
#[must_use]
pub fn matches(doc: &Document, filter: &Value) -> bool {
    match filter {
        Value::Object(map) => map.iter().all(|(key, condition)| match key.as_str() {
            "$or" => condition
                .as_array()
                .is_some_and(|subs| subs.iter().any(|sub| matches(doc, sub))),
            "$and" => condition
                .as_array()
                .is_some_and(|subs| subs.iter().all(|sub| matches(doc, sub))),
            field => field_matches(lookup_path(doc, field), condition),
        }),
        _ => false,
    }
}

fn field_matches(field: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| op_matches(field, op, operand))
        }
        expected => field == Some(expected),
    }
}

fn op_matches(field: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => field == Some(operand),
        "$ne" => field != Some(operand),
        "$gt" => ordered(field, operand).is_some_and(Ordering::is_gt),
        "$gte" => ordered(field, operand).is_some_and(Ordering::is_ge),
        "$lt" => ordered(field, operand).is_some_and(Ordering::is_lt),
        "$lte" => ordered(field, operand).is_some_and(Ordering::is_le),
        "$in" => match (field, operand.as_array()) {
            (Some(value), Some(candidates)) => candidates.contains(value),
            _ => false,
        },
        "$nin" => match operand.as_array() {
            Some(candidates) => field.map_or(true, |value| !candidates.contains(value)),
            None => false,
        },
        "$contains" => strings(field, operand).is_some_and(|(hay, needle)| hay.contains(needle)),
        "$startsWith" => {
            strings(field, operand).is_some_and(|(hay, prefix)| hay.starts_with(prefix))
        }
        "$endsWith" => strings(field, operand).is_some_and(|(hay, suffix)| hay.ends_with(suffix)),
        "$regex" => strings(field, operand)
            .and_then(|(hay, pattern)| Regex::new(pattern).ok().map(|re| re.is_match(hay)))
            .unwrap_or(false),
        "$exists" => match operand.as_bool() {
            Some(true) => field.is_some(),
            Some(false) => field.is_none(),
            None => false,
        },
        "$between" => match operand.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => {
                ordered(field, lo).is_some_and(Ordering::is_ge)
                    && ordered(field, hi).is_some_and(Ordering::is_le)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Ordered comparison between a document value and an operand.
///
/// Absent values and cross-kind pairs are non-comparable and fail every
/// ordered predicate.
fn ordered(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let field = field?;
    match (field, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn strings<'a>(field: Option<&'a Value>, operand: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((field?.as_str()?, operand.as_str()?))
}

/// Sorts documents by a multi-key sort specification.
///
/// Missing values sort before every present value; present values use
/// the total type-rank order from [`compare_values`].
pub fn sort_documents(docs: &mut [Document], sort: &[(String, SortDirection)]) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ordering = match (lookup_path(a, field), lookup_path(b, field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y),
            };
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Applies sort, skip, and limit to an already-filtered result set.
pub(crate) fn apply_post_filter(mut docs: Vec<Document>, options: &FindOptions) -> Vec<Document> {
    if !options.sort.is_empty() {
        sort_documents(&mut docs, &options.sort);
    }
    docs.into_iter()
        .skip(options.skip)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}
