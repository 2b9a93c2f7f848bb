//! Config composition
//!
//! A job config is built in three steps:
//! 1. Defaults list: group fragments and `_self_` merged left to right
//! 2. Overrides: command-line edits applied left to right
//! 3. Interpolation: `${...}` expressions evaluated (see [`crate::interp`])
//!
//! Engine settings (`plab.*`) are layered separately and never reach the job config.

mod defaults;
mod merge;
mod resolved;
mod settings;
mod tree;

pub use defaults::{DefaultsEntry, DefaultsList, DefaultsResolver, SELF_MARKER};
pub use merge::{apply_override, apply_overrides, deep_merge, merge_layers};
pub use resolved::ResolvedConfig;
pub use settings::{
    is_settings_override, CancelPolicy, EngineSettings, JobSettings, LauncherSettings,
    RunDirSettings, SettingsError, SweepDirSettings, MAX_PARALLELISM, SETTINGS_KEY,
};
pub use tree::{get_dotted, get_path, nest, render_text, split_key, NodeKind};
