//! Defaults lists and their resolution into a base tree
//!
//! A defaults list names, in order, which fragment of each config group is
//! merged, plus the position of the primary config's own inline content
//! (`_self_`). Later entries override earlier ones.

use std::collections::HashSet;

use plab_override::{format_value, Override, OverrideOp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::merge::deep_merge;
use crate::error::CompositionError;
use crate::store::GroupStore;

/// Marker for the primary config's inline content
pub const SELF_MARKER: &str = "_self_";

/// One entry of a defaults list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultsEntry {
    /// `{group = "fragment"}`; a `None` fragment is a placeholder that merges nothing
    Group {
        group: String,
        fragment: Option<String>,
    },
    /// `"_self_"`
    SelfMarker,
}

impl DefaultsEntry {
    pub fn group(group: impl Into<String>, fragment: impl Into<String>) -> Self {
        DefaultsEntry::Group {
            group: group.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Group name, `None` for `_self_`
    pub fn group_name(&self) -> Option<&str> {
        match self {
            DefaultsEntry::Group { group, .. } => Some(group),
            DefaultsEntry::SelfMarker => None,
        }
    }

    /// `group/fragment`, `group/null` or `_self_`
    pub fn label(&self) -> String {
        match self {
            DefaultsEntry::Group {
                group,
                fragment: Some(f),
            } => format!("{}/{}", group, f),
            DefaultsEntry::Group { group, fragment: None } => format!("{}/null", group),
            DefaultsEntry::SelfMarker => SELF_MARKER.to_string(),
        }
    }

    /// Parse a defaults-list entry: `"_self_"`, `{group = "fragment"}` or `{group = null}`.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) if s == SELF_MARKER => Ok(DefaultsEntry::SelfMarker),
            Value::Object(map) if map.len() == 1 => {
                let (group, selection) = map
                    .iter()
                    .next()
                    .ok_or_else(|| "empty defaults entry".to_string())?;
                match selection {
                    Value::String(f) => Ok(DefaultsEntry::group(group, f)),
                    Value::Null => Ok(DefaultsEntry::Group {
                        group: group.clone(),
                        fragment: None,
                    }),
                    other => Err(format!(
                        "defaults entry for '{}' must name a fragment, got {}",
                        group, other
                    )),
                }
            }
            other => Err(format!(
                "defaults entries are \"{}\" or {{group = \"fragment\"}}, got {}",
                SELF_MARKER, other
            )),
        }
    }
}

/// Ordered defaults list
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultsList(Vec<DefaultsEntry>);

impl DefaultsList {
    pub fn new(entries: Vec<DefaultsEntry>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[DefaultsEntry] {
        &self.0
    }

    /// Currently selected fragment of `group`
    pub fn selection(&self, group: &str) -> Option<&str> {
        self.0.iter().find_map(|e| match e {
            DefaultsEntry::Group {
                group: g,
                fragment: Some(f),
            } if g == group => Some(f.as_str()),
            _ => None,
        })
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(DefaultsEntry::label).collect()
    }

    fn position(&self, group: &str) -> Option<usize> {
        self.0.iter().position(|e| e.group_name() == Some(group))
    }

    /// Apply a group-selection override (`fit=gamma`, `+viz=basic`, `~extreme`).
    ///
    /// The override must carry at most one value; sweeps are expanded first.
    pub fn apply_selection(&mut self, ov: &Override, store: &GroupStore) -> Result<(), CompositionError> {
        let group = ov.root_key().to_string();

        if ov.values.len() > 1 {
            return Err(CompositionError::AmbiguousSelection {
                group,
                count: ov.values.len(),
            });
        }

        let fragment = match ov.value() {
            None => None,
            Some(Value::String(name)) => {
                store.fragment(&group, name)?;
                Some(name.clone())
            }
            Some(Value::Null) if ov.op == OverrideOp::Set => None,
            Some(other) => {
                return Err(CompositionError::InvalidSelection {
                    group,
                    value: format_value(other),
                })
            }
        };

        match ov.op {
            OverrideOp::Set => {
                let idx = self
                    .position(&group)
                    .ok_or(CompositionError::GroupNotInDefaults { group: group.clone() })?;
                self.0[idx] = DefaultsEntry::Group { group, fragment };
            }
            OverrideOp::Add => {
                if self.position(&group).is_some() {
                    return Err(CompositionError::GroupAlreadySelected { group });
                }
                self.0.push(DefaultsEntry::Group { group, fragment });
            }
            OverrideOp::ForceAdd => {
                let entry = DefaultsEntry::Group {
                    group: group.clone(),
                    fragment,
                };
                match self.position(&group) {
                    Some(idx) => self.0[idx] = entry,
                    None => self.0.push(entry),
                }
            }
            OverrideOp::Delete => {
                let idx = self
                    .position(&group)
                    .ok_or(CompositionError::GroupNotInDefaults { group: group.clone() })?;
                if let Some(expected) = &fragment {
                    let current = self.selection(&group).unwrap_or("null");
                    if current != expected {
                        return Err(CompositionError::DeleteMismatch {
                            key: group,
                            expected: expected.clone(),
                            actual: current.to_string(),
                        });
                    }
                }
                self.0.remove(idx);
            }
        }
        Ok(())
    }
}

impl From<Vec<DefaultsEntry>> for DefaultsList {
    fn from(entries: Vec<DefaultsEntry>) -> Self {
        Self(entries)
    }
}

/// Folds a defaults list into a single base tree
pub struct DefaultsResolver<'s> {
    store: &'s GroupStore,
}

impl<'s> DefaultsResolver<'s> {
    pub fn new(store: &'s GroupStore) -> Self {
        Self { store }
    }

    /// Merge each entry in order. `_self_` is merged last when the list omits it.
    pub fn resolve(&self, defaults: &DefaultsList, inline: &Value) -> Result<Value, CompositionError> {
        let mut seen = HashSet::new();
        let mut has_self = false;
        for entry in defaults.entries() {
            let name = entry.group_name().unwrap_or(SELF_MARKER);
            if !seen.insert(name) {
                return Err(CompositionError::DuplicateGroup(name.to_string()));
            }
            has_self |= *entry == DefaultsEntry::SelfMarker;
        }

        let mut tree = Value::Object(Map::new());
        let self_marker = DefaultsEntry::SelfMarker;
        let trailing_self = (!has_self).then_some(&self_marker);

        for entry in defaults.entries().iter().chain(trailing_self) {
            match entry {
                DefaultsEntry::SelfMarker => {
                    if inline.is_object() {
                        tree = deep_merge(tree, inline.clone());
                    }
                }
                DefaultsEntry::Group { fragment: None, .. } => {}
                DefaultsEntry::Group {
                    group,
                    fragment: Some(name),
                } => {
                    let fragment = self.store.fragment(group, name)?;
                    tree = deep_merge(tree, fragment.packaged(group));
                }
            }
        }

        Ok(tree)
    }
}
