//! Field-path lookup over JSON values.
//!
//! Paths are dotted keys with optional bracket indices: `a.b[0].c` and
//! `a.b.0.c` address the same value. A numeric segment indexes arrays and is
//! an ordinary key on objects.

use serde_json::Value;

/// Value at `path`, or `None` when any segment is missing.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Value at `path` as a string.
///
/// `null` and empty strings count as unresolved. Numbers and booleans are
/// rendered in their JSON form; nested objects and arrays as compact JSON.
pub fn resolve_string(value: &Value, path: &str) -> Option<String> {
    match resolve(value, path)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['.', '[', ']']).filter(|s| !s.is_empty())
}
