//! Document model helpers.
//!
//! A document is a JSON object ([`Document`]); values are the JSON kinds
//! of [`serde_json::Value`]. The helpers here implement dot-path access
//! and the total cross-type ordering the query layer relies on.

use serde_json::Value;
use std::cmp::Ordering;
use std::sync::{Mutex, OnceLock};
use uuid::{ContextV7, Timestamp, Uuid};

pub use lmcs_codec::Document;

/// Reserved key holding the document identifier.
pub const ID_FIELD: &str = "_id";

fn v7_context() -> &'static Mutex<ContextV7> {
    static CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();
    CONTEXT.get_or_init(|| Mutex::new(ContextV7::new()))
}

/// Generates a fresh time-ordered document id.
///
/// UUIDv7: millisecond timestamp in the high bits, randomness elsewhere;
/// the shared context keeps ids monotonic within the process.
pub(crate) fn next_document_id() -> String {
    let context = v7_context().lock().unwrap_or_else(|err| err.into_inner());
    Uuid::new_v7(Timestamp::now(&*context)).to_string()
}

/// Resolves a dot-path (`"address.city"`) inside a document.
///
/// Returns `None` when any segment is missing or a non-object is
/// traversed. An explicit JSON `null` is a present value, not an absent
/// one.
#[must_use]
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over JSON values.
///
/// Values of different kinds order by type rank
/// (null < bool < number < string < array < object); values of the same
/// kind order naturally. Numbers compare as f64 with `total_cmp`, arrays
/// lexicographically, objects by their serialized form.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank_a = type_rank(a);
    let rank_b = type_rank(b);
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let xf = x.as_f64().unwrap_or(f64::NAN);
            let yf = y.as_f64().unwrap_or(f64::NAN);
            xf.total_cmp(&yf)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ordering = compare_values(xi, yi);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => {
            let xs = serde_json::to_string(a).unwrap_or_default();
            let ys = serde_json::to_string(b).unwrap_or_default();
            xs.cmp(&ys)
        }
        _ => Ordering::Equal,
    }
}
