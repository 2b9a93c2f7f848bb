//! plab - config composition and sweep runner
//!
//! Builds hierarchical experiment configs from reusable fragments, applies
//! command-line overrides, resolves `${...}` interpolations and runs one job
//! per point of a parameter sweep.
//!
//! ```no_run
//! use std::path::Path;
//! use plab_runner::{compose, GroupStore, PrimaryConfig, ResolverRegistry};
//!
//! let store = GroupStore::load(Path::new("conf"))?;
//! let primary = PrimaryConfig::load(Path::new("conf"), "config")?;
//! let overrides = plab_runner::parse_overrides(&["fit=gamma", "extreme.threshold=0.99"])?;
//! let config = compose(&store, &primary, &overrides, &ResolverRegistry::new())?;
//! println!("{}", config.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod callback;
pub mod compose;
pub mod config;
pub mod error;
pub mod interp;
pub mod job;
pub mod logging;
pub mod runner;
pub mod signal;
pub mod state;
pub mod store;
pub mod summary;
pub mod sweep;

pub use callback::{CallbackError, CommandCallback, JobCallback, JobContext};
pub use compose::{compose, plan, RunPlan};
pub use config::{DefaultsEntry, DefaultsList, EngineSettings, ResolvedConfig};
pub use error::{CompositionError, Error, InterpolationError, JobExecutionError, OverrideSyntaxError};
pub use interp::{Interpolator, ResolverRegistry};
pub use job::{Job, JobError};
pub use plab_override::{parse_override, parse_overrides, Override, OverrideOp};
pub use runner::{DryRunJob, JobRunner};
pub use signal::{CancelToken, SignalHandler};
pub use state::{JobState, JobStateData};
pub use store::{Fragment, GroupStore, PrimaryConfig};
pub use summary::{ExitCode, JobSummary, RunSummary, Status};
