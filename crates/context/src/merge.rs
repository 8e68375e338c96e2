//! Generic deep merge over YAML documents.
//!
//! Used for keys the typed [`ContextDocument`](crate::document::ContextDocument)
//! does not model. Rules:
//! - mappings merge key-by-key, recursing when both sides hold a mapping
//! - sequences are unioned by identity key, base items first
//! - anything else: the overlay wins
//! - a `null` overlay value keeps whatever the base had

use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

/// Merge `src` over `dst`, returning a new mapping. Neither input is modified.
pub fn deep_merge(dst: &Mapping, src: &Mapping) -> Mapping {
    let mut out = dst.clone();
    for (key, incoming) in src {
        if incoming.is_null() {
            continue;
        }
        let merged = match (out.get(key), incoming) {
            (Some(Value::Mapping(existing)), Value::Mapping(overlay)) => {
                Value::Mapping(deep_merge(existing, overlay))
            }
            (Some(existing), Value::Sequence(overlay)) => {
                let base = match existing {
                    Value::Sequence(items) => items.as_slice(),
                    _ => &[],
                };
                Value::Sequence(union_by_key(base, overlay, value_key))
            }
            _ => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Union two lists: every `base` item in order, then each `overlay` item
/// whose key has not been seen yet. Duplicates inside `base` are kept.
pub fn union_by_key<T, K, F>(base: &[T], overlay: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + std::hash::Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = base.iter().map(&key).collect();
    let mut out = base.to_vec();
    for item in overlay {
        if seen.insert(key(item)) {
            out.push(item.clone());
        }
    }
    out
}

/// Identity of a list item: the string itself, a tool's `name` (else `uri`),
/// or the item's rendered form.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Mapping(map) => ["name", "uri"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(String::from)
            .unwrap_or_else(|| format!("{map:?}")),
        other => format!("{other:?}"),
    }
}
