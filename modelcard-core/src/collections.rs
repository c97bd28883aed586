//! Helpers to splice entries into insertion-ordered JSON maps.

use serde_json::{Map, Value};

/// Insert `new_key: new_value` right after `after_key`.
///
/// An empty map yields a singleton. When `after_key` is absent the map is
/// returned unchanged.
pub fn insert_after(
    map: Map<String, Value>,
    new_key: &str,
    new_value: Value,
    after_key: &str,
) -> Map<String, Value> {
    if map.is_empty() {
        let mut out = Map::new();
        out.insert(new_key.to_string(), new_value);
        return out;
    }
    let mut out = Map::with_capacity(map.len() + 1);
    let mut pending = Some(new_value);
    for (key, value) in map {
        let is_anchor = key == after_key;
        out.insert(key, value);
        if is_anchor {
            if let Some(v) = pending.take() {
                out.insert(new_key.to_string(), v);
            }
        }
    }
    out
}

/// Insert every pair of `insert` right after `after_key`.
///
/// Unchanged when `after_key` is absent.
pub fn insert_dict_after(
    map: Map<String, Value>,
    insert: Map<String, Value>,
    after_key: &str,
) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len() + insert.len());
    let mut pending = Some(insert);
    for (key, value) in map {
        let is_anchor = key == after_key;
        out.insert(key, value);
        if is_anchor {
            if let Some(extra) = pending.take() {
                out.extend(extra);
            }
        }
    }
    out
}

/// Like [`insert_after`], but appends when the anchor is missing so the
/// entry is never dropped.
pub fn insert_after_or_push(
    map: Map<String, Value>,
    new_key: &str,
    new_value: Value,
    after_key: &str,
) -> Map<String, Value> {
    if map.contains_key(after_key) || map.is_empty() {
        return insert_after(map, new_key, new_value, after_key);
    }
    let mut out = map;
    out.insert(new_key.to_string(), new_value);
    out
}

/// Like [`insert_dict_after`], but appends when the anchor is missing.
pub fn insert_dict_after_or_push(
    map: Map<String, Value>,
    insert: Map<String, Value>,
    after_key: &str,
) -> Map<String, Value> {
    if map.contains_key(after_key) {
        return insert_dict_after(map, insert, after_key);
    }
    let mut out = map;
    out.extend(insert);
    out
}
