//! Config tree merging
//!
//! Layer merge semantics:
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)
//!
//! Override application adds the per-operation rules on top of that:
//! - `key=v`: key must exist and the kinds must be compatible
//! - `+key=v`: key must not exist, intermediate maps are created
//! - `++key=v`: add or replace
//! - `~key[=v]`: key must exist (and equal `v` when given)

use plab_override::{format_value, Override, OverrideOp};
use serde_json::{Map, Value};

use super::tree::NodeKind;
use crate::error::CompositionError;

/// Deep merge two config values.
///
/// Merge semantics:
/// - Objects: deep-merge by key (recursive)
/// - Arrays: REPLACE (second wins entirely)
/// - Scalars: override (second wins)
/// - Null: override (null can override any value)
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value.take(), overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        (Value::Array(_), overlay @ Value::Array(_)) => overlay,

        (_, overlay) => overlay,
    }
}

/// Merge multiple layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

/// Apply overrides left to right to a copy of `base`.
pub fn apply_overrides(base: &Value, overrides: &[Override]) -> Result<Value, CompositionError> {
    let mut tree = base.clone();
    for ov in overrides {
        apply_override(&mut tree, ov)?;
    }
    Ok(tree)
}

/// Apply one override in place.
pub fn apply_override(tree: &mut Value, ov: &Override) -> Result<(), CompositionError> {
    let key = ov.key();
    let Some((leaf, parents)) = ov.key_path.split_last() else {
        return Err(CompositionError::KeyMissing { key });
    };

    match ov.op {
        OverrideOp::Set => {
            let value = assigned_value(ov);
            let parent = walk_existing(tree, parents, &key)?;
            let existing = parent
                .get_mut(leaf)
                .ok_or_else(|| CompositionError::KeyMissing { key: key.clone() })?;
            check_compatible(&key, existing, &value)?;
            *existing = match (existing.take(), value) {
                (old @ Value::Object(_), new @ Value::Object(_)) => deep_merge(old, new),
                (_, new) => new,
            };
        }
        OverrideOp::Add => {
            let parent = walk_or_create(tree, parents)?;
            if parent.contains_key(leaf) {
                return Err(CompositionError::KeyExists { key });
            }
            parent.insert(leaf.clone(), assigned_value(ov));
        }
        OverrideOp::ForceAdd => {
            let parent = walk_or_create(tree, parents)?;
            parent.insert(leaf.clone(), assigned_value(ov));
        }
        OverrideOp::Delete => {
            let parent = walk_existing(tree, parents, &key)?;
            let existing = parent
                .get(leaf)
                .ok_or_else(|| CompositionError::KeyMissing { key: key.clone() })?;
            if let Some(expected) = ov.value() {
                if existing != expected {
                    return Err(CompositionError::DeleteMismatch {
                        key,
                        expected: format_value(expected),
                        actual: format_value(existing),
                    });
                }
            }
            parent.shift_remove(leaf);
        }
    }
    Ok(())
}

/// An uncollapsed multi-value override assigns the whole list.
fn assigned_value(ov: &Override) -> Value {
    match ov.values.as_slice() {
        [single] => single.clone(),
        many => Value::Array(many.to_vec()),
    }
}

fn check_compatible(key: &str, existing: &Value, replacement: &Value) -> Result<(), CompositionError> {
    match (NodeKind::of(existing), NodeKind::of(replacement)) {
        (NodeKind::Null, _) | (_, NodeKind::Null) => Ok(()),
        (a, b) if a == b => Ok(()),
        (a, b) => Err(CompositionError::TypeMismatch {
            key: key.to_string(),
            existing: a.as_str(),
            replacement: b.as_str(),
        }),
    }
}

fn not_a_map(key: &str, found: NodeKind) -> CompositionError {
    CompositionError::TypeMismatch {
        key: key.to_string(),
        existing: found.as_str(),
        replacement: NodeKind::Map.as_str(),
    }
}

/// Walk to the map holding the leaf; every segment must already exist.
fn walk_existing<'a>(
    tree: &'a mut Value,
    parents: &[String],
    key: &str,
) -> Result<&'a mut Map<String, Value>, CompositionError> {
    let mut current = tree;
    for (depth, segment) in parents.iter().enumerate() {
        let found = NodeKind::of(current);
        let map = current
            .as_object_mut()
            .ok_or_else(|| not_a_map(&parents[..depth].join("."), found))?;
        current = map
            .get_mut(segment)
            .ok_or_else(|| CompositionError::KeyMissing { key: key.to_string() })?;
    }
    let found = NodeKind::of(current);
    current
        .as_object_mut()
        .ok_or_else(|| not_a_map(&parents.join("."), found))
}

/// Walk to the map holding the leaf, creating missing (or null) maps on the way.
fn walk_or_create<'a>(
    tree: &'a mut Value,
    parents: &[String],
) -> Result<&'a mut Map<String, Value>, CompositionError> {
    let mut current = tree;
    for (depth, segment) in parents.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let found = NodeKind::of(current);
        let map = current
            .as_object_mut()
            .ok_or_else(|| not_a_map(&parents[..depth].join("."), found))?;
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    let found = NodeKind::of(current);
    current
        .as_object_mut()
        .ok_or_else(|| not_a_map(&parents.join("."), found))
}
