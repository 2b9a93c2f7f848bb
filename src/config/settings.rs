//! Engine settings
//!
//! Settings never appear in the job config. They are layered like this:
//! 1. Built-in defaults
//! 2. The primary config's `[plab]` table
//! 3. `plab.*` command-line overrides
//! 4. CLI flags

use plab_override::{Override, OverrideOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::merge::{deep_merge, merge_layers};
use super::tree::nest;

/// Root key of the settings namespace
pub const SETTINGS_KEY: &str = "plab";

/// Maximum number of concurrent jobs
pub const MAX_PARALLELISM: usize = 256;

/// What happens to in-flight jobs when a run is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Let in-flight jobs finish
    #[default]
    Drain,
    /// Signal in-flight jobs to stop and record them as cancelled
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunDirSettings {
    /// Working directory template for a single run
    pub dir: String,
}

impl Default for RunDirSettings {
    fn default() -> Self {
        Self {
            dir: "outputs/${now:%Y-%m-%d}/${now:%H-%M-%S}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepDirSettings {
    /// Parent directory template for a multirun
    pub dir: String,
    /// Per-job subdirectory template below `dir`
    pub subdir: String,
}

impl Default for SweepDirSettings {
    fn default() -> Self {
        Self {
            dir: "multirun/${now:%Y-%m-%d}/${now:%H-%M-%S}".to_string(),
            subdir: "${plab.job.num}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherSettings {
    /// Concurrent jobs (1 = sequential)
    pub parallelism: usize,
    pub cancel_policy: CancelPolicy,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            parallelism: 1,
            cancel_policy: CancelPolicy::Drain,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSettings {
    /// Job name exposed as `${plab.job.name}` (defaults to the primary config name)
    pub name: Option<String>,
    /// Reuse non-empty working directories
    pub overwrite: bool,
}

/// Settings that steer the engine itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub run: RunDirSettings,
    pub sweep: SweepDirSettings,
    pub launcher: LauncherSettings,
    pub job: JobSettings,
    /// Directory inside each working directory holding the persisted artifacts
    pub output_subdir: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            run: RunDirSettings::default(),
            sweep: SweepDirSettings::default(),
            launcher: LauncherSettings::default(),
            job: JobSettings::default(),
            output_subdir: ".plab".to_string(),
        }
    }
}

impl EngineSettings {
    /// Merge layers over the built-in defaults and validate the result.
    pub fn from_layers(layers: Vec<Value>) -> Result<Self, SettingsError> {
        let builtin =
            serde_json::to_value(Self::default()).map_err(|e| SettingsError::Parse(e.to_string()))?;
        let merged = merge_layers(std::iter::once(builtin).chain(layers).collect());
        let settings: Self =
            serde_json::from_value(merged).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build from the `[plab]` table, `plab.*` overrides and a CLI flag layer.
    pub fn build(table: &Value, overrides: &[Override], cli: Option<Value>) -> Result<Self, SettingsError> {
        let mut layers = vec![table.clone(), overrides_layer(overrides)?];
        layers.extend(cli);
        Self::from_layers(layers)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.launcher.parallelism == 0 || self.launcher.parallelism > MAX_PARALLELISM {
            return Err(SettingsError::Validation(format!(
                "launcher.parallelism must be in [1, {}]",
                MAX_PARALLELISM
            )));
        }
        for (key, template) in [
            ("run.dir", &self.run.dir),
            ("sweep.dir", &self.sweep.dir),
            ("sweep.subdir", &self.sweep.subdir),
        ] {
            if template.trim().is_empty() {
                return Err(SettingsError::Validation(format!("{} must not be empty", key)));
            }
        }
        if self.output_subdir.trim().is_empty() || self.output_subdir.contains(['/', '\\']) {
            return Err(SettingsError::Validation(
                "output_subdir must be a single directory name".to_string(),
            ));
        }
        Ok(())
    }
}

/// True for overrides addressed to the settings namespace (`plab.*`)
pub fn is_settings_override(ov: &Override) -> bool {
    ov.root_key() == SETTINGS_KEY
}

/// Fold `plab.*` overrides into one settings layer.
fn overrides_layer(overrides: &[Override]) -> Result<Value, SettingsError> {
    let mut layer = Value::Object(Default::default());
    for ov in overrides {
        let path = ov
            .key_path
            .split_first()
            .filter(|(root, rest)| root.as_str() == SETTINGS_KEY && !rest.is_empty())
            .map(|(_, rest)| rest)
            .ok_or_else(|| SettingsError::Unsupported(format!("'{}' is not a settings key", ov.raw)))?;
        if ov.op == OverrideOp::Delete {
            return Err(SettingsError::Unsupported(format!(
                "settings cannot be deleted: '{}'",
                ov.raw
            )));
        }
        if ov.values.len() != 1 {
            return Err(SettingsError::Unsupported(format!(
                "settings cannot be swept: '{}'",
                ov.raw
            )));
        }
        layer = deep_merge(layer, nest(path, ov.values[0].clone()));
    }
    Ok(layer)
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Parse(String),

    #[error("settings validation error: {0}")]
    Validation(String),

    #[error("unsupported settings override: {0}")]
    Unsupported(String),
}
