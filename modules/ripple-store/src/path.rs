//! Key-path access into nested JSON records.
//!
//! Reads never create nodes. Writes never touch the caller's value: `set`
//! copies the root it borrows, `set_owned` rebuilds only the records along
//! the path of a root it already owns.

use serde_json::{Map, Value};

/// Walk `path` through nested records. `None` as soon as a segment is missing
/// or an intermediate is not a record.
pub fn get<'a, K: AsRef<str>>(root: &'a Value, path: &[K]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |node, key| node.as_object()?.get(key.as_ref()))
}

/// Return a new root with `value` stored at `path`. An empty path returns
/// `value` itself.
pub fn set<K: AsRef<str>>(root: &Value, path: &[K], value: Value) -> Value {
    if path.is_empty() {
        return value;
    }
    set_owned(root.clone(), path, value)
}

/// Owned variant of [`set`]. Missing or non-record intermediates are replaced
/// by empty records.
pub fn set_owned<K: AsRef<str>>(root: Value, path: &[K], value: Value) -> Value {
    let Some((key, rest)) = path.split_first() else {
        return value;
    };

    let mut record = match root {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let child = record.remove(key.as_ref()).unwrap_or(Value::Null);
    record.insert(key.as_ref().to_string(), set_owned(child, rest, value));
    Value::Object(record)
}

/// Split a dotted key (`"meta.id"`) into path segments.
pub fn split_dotted(key: &str) -> Vec<String> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
