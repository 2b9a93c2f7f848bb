//! Path helpers over config trees
//!
//! A config tree is a `serde_json::Value` whose root is an object. Object
//! keys keep insertion order (`preserve_order`), so serialization follows
//! the order keys were first introduced.

use serde_json::{Map, Value};

/// Coarse node kind used for merge compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Map,
    Sequence,
    Scalar,
    Null,
}

impl NodeKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => NodeKind::Map,
            Value::Array(_) => NodeKind::Sequence,
            Value::Null => NodeKind::Null,
            _ => NodeKind::Scalar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Map => "map",
            NodeKind::Sequence => "sequence",
            NodeKind::Scalar => "scalar",
            NodeKind::Null => "null",
        }
    }
}

/// Split a dotted key into segments.
pub fn split_key(key: &str) -> Vec<String> {
    key.split('.').map(str::to_string).collect()
}

/// Look up a node by path. Sequence elements are addressed by index.
pub fn get_path<'a, S: AsRef<str>>(root: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Look up a node by dotted key.
pub fn get_dotted<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(root);
    }
    get_path(root, &key.split('.').collect::<Vec<_>>())
}

/// Build a tree holding `value` at `path`, e.g. `["a", "b"]` -> `{"a": {"b": value}}`.
pub fn nest<S: AsRef<str>>(path: &[S], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.as_ref().to_string(), inner);
        Value::Object(map)
    })
}

/// Render a scalar the way it appears when spliced into text.
///
/// Strings are used verbatim; maps and sequences render as compact JSON.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
