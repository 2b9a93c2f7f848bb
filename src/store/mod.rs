//! Config group store
//!
//! A config directory looks like:
//!
//! ```text
//! conf/
//!   config.toml          primary config (defaults list, inline values, [plab] settings)
//!   data/sample.toml     fragment "sample" of group "data"
//!   fit/weibull_min.toml
//!   fit/lognorm.json
//! ```
//!
//! The store is read once and never mutated afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{nest, split_key, DefaultsEntry, DefaultsList, SETTINGS_KEY};
use crate::error::CompositionError;

/// Fragment key that moves its content away from the group key
pub const PACKAGE_KEY: &str = "_package_";

/// Package value that merges a fragment at the root
pub const GLOBAL_PACKAGE: &str = "_global_";

const FRAGMENT_EXTENSIONS: &[&str] = &["toml", "json"];

/// Where a fragment's content lands in the composed tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    /// Under the group key (default)
    Group,
    /// At the root
    Global,
    /// Under an explicit dotted path
    Path(Vec<String>),
}

/// A named fragment of a config group
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    node: Value,
    package: Package,
    source: Option<ConfigSource>,
}

impl Fragment {
    /// Build a fragment from a map node, honouring a `_package_` key.
    pub fn new(mut node: Value) -> Self {
        let package = match node.as_object_mut().and_then(|m| m.shift_remove(PACKAGE_KEY)) {
            Some(Value::String(p)) if p == GLOBAL_PACKAGE => Package::Global,
            Some(Value::String(p)) if !p.is_empty() => Package::Path(split_key(&p)),
            _ => Package::Group,
        };
        Self {
            node,
            package,
            source: None,
        }
    }

    pub fn node(&self) -> &Value {
        &self.node
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn source(&self) -> Option<&ConfigSource> {
        self.source.as_ref()
    }

    /// Content positioned for merging into the tree root
    pub fn packaged(&self, group: &str) -> Value {
        match &self.package {
            Package::Group => nest(&[group], self.node.clone()),
            Package::Global => self.node.clone(),
            Package::Path(path) => nest(path, self.node.clone()),
        }
    }
}

/// A config file that contributed to the store, with its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSource {
    pub path: String,
    /// SHA-256 of the raw file bytes
    pub digest: String,
}

/// Immutable catalog of fragments keyed by (group, fragment)
#[derive(Debug, Clone, Default)]
pub struct GroupStore {
    groups: BTreeMap<String, BTreeMap<String, Fragment>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment while building a store in code.
    pub fn with_fragment(
        mut self,
        group: impl Into<String>,
        name: impl Into<String>,
        fragment: Fragment,
    ) -> Result<Self, StoreError> {
        self.insert(group.into(), name.into(), fragment)?;
        Ok(self)
    }

    /// Load every `<group>/<fragment>.{toml,json}` below `dir`.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::NotFound(dir.to_path_buf()));
        }

        let mut store = Self::new();
        let walker = WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Io {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !has_fragment_extension(path) {
                continue;
            }

            let group = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;
            let name = path
                .file_stem()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;

            let (node, source) = load_document(path)?;
            let mut fragment = Fragment::new(node);
            fragment.source = Some(source);
            debug!(group = %group, fragment = %name, path = %path.display(), "Loaded fragment");
            store.insert(group, name, fragment)?;
        }

        Ok(store)
    }

    fn insert(&mut self, group: String, name: String, fragment: Fragment) -> Result<(), StoreError> {
        if !fragment.node.is_object() {
            return Err(StoreError::NotAMap(format!("{}/{}", group, name)));
        }
        let fragments = self.groups.entry(group.clone()).or_default();
        if fragments.contains_key(&name) {
            return Err(StoreError::DuplicateFragment { group, fragment: name });
        }
        fragments.insert(name, fragment);
        Ok(())
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn get(&self, group: &str, name: &str) -> Option<&Fragment> {
        self.groups.get(group)?.get(name)
    }

    /// Like [`get`](Self::get), failing with the available fragment names.
    pub fn fragment(&self, group: &str, name: &str) -> Result<&Fragment, CompositionError> {
        self.get(group, name).ok_or_else(|| CompositionError::MissingFragment {
            group: group.to_string(),
            fragment: name.to_string(),
            available: self.fragment_names(group).join(", "),
        })
    }

    /// Group names in sorted order
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Fragment names of `group` in sorted order
    pub fn fragment_names(&self, group: &str) -> Vec<&str> {
        self.groups
            .get(group)
            .map(|f| f.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// The root config of a run
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryConfig {
    pub name: String,
    pub defaults: DefaultsList,
    /// Everything except `defaults` and `[plab]`
    pub inline: Value,
    /// The `[plab]` table, layered into the engine settings
    pub settings: Value,
    pub source: Option<ConfigSource>,
}

impl PrimaryConfig {
    /// Load `<dir>/<name>.toml` (or `.json`).
    pub fn load(dir: &Path, name: &str) -> Result<Self, StoreError> {
        let path = FRAGMENT_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| StoreError::NotFound(dir.join(format!("{}.toml", name))))?;

        let (value, source) = load_document(&path)?;
        let mut primary = Self::from_value(name, value)?;
        primary.source = Some(source);
        Ok(primary)
    }

    /// Split a parsed primary document into its parts.
    pub fn from_value(name: &str, value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut map) = value else {
            return Err(StoreError::NotAMap(name.to_string()));
        };

        let defaults = match map.shift_remove("defaults") {
            None => DefaultsList::default(),
            Some(Value::Array(items)) => items
                .iter()
                .map(DefaultsEntry::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::InvalidDefaults)?
                .into(),
            Some(other) => {
                return Err(StoreError::InvalidDefaults(format!(
                    "'defaults' must be an array, got {}",
                    other
                )))
            }
        };

        let settings = match map.shift_remove(SETTINGS_KEY) {
            None => Value::Object(Map::new()),
            Some(v @ Value::Object(_)) => v,
            Some(other) => {
                return Err(StoreError::Parse {
                    path: PathBuf::from(name),
                    reason: format!("'[{}]' must be a table, got {}", SETTINGS_KEY, other),
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            defaults,
            inline: Value::Object(map),
            settings,
            source: None,
        })
    }
}

fn has_fragment_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAGMENT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Read and parse a TOML or JSON document, returning the value and digest
fn load_document(path: &Path) -> Result<(Value, ConfigSource), StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let parse_err = |reason: String| StoreError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let contents = String::from_utf8(bytes).map_err(|e| parse_err(format!("invalid UTF-8: {}", e)))?;

    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
        _ => {
            let table: toml::Value = toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;
            toml_to_json(table)
        }
    };

    if !value.is_object() {
        return Err(StoreError::NotAMap(path.display().to_string()));
    }

    Ok((
        value,
        ConfigSource {
            path: path.display().to_string(),
            digest,
        },
    ))
}

/// Convert a TOML value to a JSON value
pub fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}

/// Errors raised while loading config files
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("parse error in {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("config '{0}' must be a table at the top level")]
    NotAMap(String),

    #[error("invalid defaults list: {0}")]
    InvalidDefaults(String),

    #[error("fragment '{group}/{fragment}' is defined more than once")]
    DuplicateFragment { group: String, fragment: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_load_groups_and_fragments() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "config.toml", "defaults = []\n");
        write(temp.path(), "fit/weibull_min.toml", "dist = \"weibull_min\"\nmle = true\n");
        write(temp.path(), "fit/lognorm.json", r#"{"dist": "lognorm", "mle": true}"#);
        write(temp.path(), "data/sample.toml", "path = \"data/sample.csv\"\n");
        write(temp.path(), "data/README.md", "ignored");
        write(temp.path(), ".hidden/x.toml", "a = 1\n");

        let store = GroupStore::load(temp.path()).unwrap();
        assert_eq!(store.group_names(), vec!["data", "fit"]);
        assert_eq!(store.fragment_names("fit"), vec!["lognorm", "weibull_min"]);
        assert_eq!(
            store.get("fit", "lognorm").unwrap().node(),
            &json!({"dist": "lognorm", "mle": true})
        );

        let source = store.get("data", "sample").unwrap().source().unwrap();
        assert_eq!(source.digest.len(), 64);
    }

    #[test]
    fn test_missing_directory() {
        let err = GroupStore::load(Path::new("/nonexistent/plab/conf")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_stem_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "fit/gamma.toml", "dist = \"gamma\"\n");
        write(temp.path(), "fit/gamma.json", r#"{"dist": "gamma"}"#);
        let err = GroupStore::load(temp.path()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFragment { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "fit/bad.toml", "dist = \n");
        let err = GroupStore::load(temp.path()).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_fragment_error() {
        let store = GroupStore::new()
            .with_fragment("fit", "gamma", Fragment::new(json!({"dist": "gamma"})))
            .unwrap();
        let err = store.fragment("fit", "beta").unwrap_err();
        assert!(err.to_string().contains("fit/beta"));
        assert!(err.to_string().contains("gamma"));
    }

    #[test]
    fn test_package_placement() {
        let grouped = Fragment::new(json!({"dist": "gamma"}));
        assert_eq!(grouped.packaged("fit"), json!({"fit": {"dist": "gamma"}}));

        let global = Fragment::new(json!({"_package_": "_global_", "seed": 3}));
        assert_eq!(global.package(), &Package::Global);
        assert_eq!(global.packaged("fit"), json!({"seed": 3}));

        let nested = Fragment::new(json!({"_package_": "model.fit", "dist": "gamma"}));
        assert_eq!(nested.packaged("fit"), json!({"model": {"fit": {"dist": "gamma"}}}));
    }

    #[test]
    fn test_primary_config_split() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "config.toml",
            r#"
defaults = ["_self_", { data = "sample" }, { fit = "weibull_min" }]
seed = 42

[fit]
mle = true

[plab.launcher]
parallelism = 4
"#,
        );

        let primary = PrimaryConfig::load(temp.path(), "config").unwrap();
        assert_eq!(primary.name, "config");
        assert_eq!(
            primary.defaults.labels(),
            vec!["_self_", "data/sample", "fit/weibull_min"]
        );
        assert_eq!(primary.inline, json!({"seed": 42, "fit": {"mle": true}}));
        assert_eq!(primary.settings, json!({"launcher": {"parallelism": 4}}));
        assert!(primary.source.is_some());
    }

    #[test]
    fn test_primary_config_missing() {
        let temp = TempDir::new().unwrap();
        let err = PrimaryConfig::load(temp.path(), "config").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_primary_config_bad_defaults() {
        let err = PrimaryConfig::from_value("config", json!({"defaults": "fit"})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDefaults(_)));

        let err = PrimaryConfig::from_value("config", json!({"defaults": [42]})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDefaults(_)));
    }

    #[test]
    fn test_toml_to_json() {
        let table: toml::Value = toml::from_str("a = 1\nb = 2.5\nc = [true]\n[d]\ne = \"x\"\n").unwrap();
        assert_eq!(
            toml_to_json(table),
            json!({"a": 1, "b": 2.5, "c": [true], "d": {"e": "x"}})
        );
    }
}
