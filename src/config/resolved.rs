//! Fully resolved job configuration
//!
//! A resolved config is the composed tree after every `${...}` expression
//! has been evaluated. It is immutable and is what a job callback receives.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

use super::tree::get_dotted;

/// A resolved configuration tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    tree: Value,
}

impl ResolvedConfig {
    pub(crate) fn new(tree: Value) -> Self {
        Self { tree }
    }

    pub fn as_value(&self) -> &Value {
        &self.tree
    }

    pub fn into_value(self) -> Value {
        self.tree
    }

    /// SHA-256 over the RFC 8785 canonical form, independent of key order
    pub fn digest(&self) -> String {
        // Value trees hold only finite numbers, so canonicalization cannot fail;
        // fall back to compact JSON to keep this infallible.
        let canonical = serde_json_canonicalizer::to_vec(&self.tree)
            .unwrap_or_else(|_| self.tree.to_string().into_bytes());
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.tree)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)
    }

    /// Get a config value by path (dot-separated, sequence indices allowed)
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_dotted(&self.tree, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(|v| v.as_i64())
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}
