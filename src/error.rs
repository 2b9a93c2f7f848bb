//! Error taxonomy
//!
//! - `CompositionError`: missing group/fragment, type-incompatible merge,
//!   additive-override collision, working-directory collision
//! - `OverrideSyntaxError`: malformed override string (from `plab-override`)
//! - `InterpolationError`: unresolved reference, unknown resolver, cycle
//! - `JobExecutionError`: failure raised by the job callback

use std::io;
use std::path::PathBuf;

pub use plab_override::OverrideSyntaxError;

use crate::config::SettingsError;
use crate::job::JobError;
use crate::store::StoreError;
use crate::summary::ExitCode;

/// Errors raised while assembling a config tree
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompositionError {
    #[error("could not find '{group}/{fragment}' (available: {available})")]
    MissingFragment {
        group: String,
        fragment: String,
        available: String,
    },

    #[error("group '{0}' appears more than once in the defaults list")]
    DuplicateGroup(String),

    #[error("could not override '{group}': no match in the defaults list (to append use +{group}=...)")]
    GroupNotInDefaults { group: String },

    #[error("group '{group}' already has a selection in the defaults list, use {group}=... to replace it")]
    GroupAlreadySelected { group: String },

    #[error("group '{group}' needs a fragment name, got {value}")]
    InvalidSelection { group: String, value: String },

    #[error("ambiguous selection for group '{group}': {count} fragments given outside multirun (use --multirun to sweep)")]
    AmbiguousSelection { group: String, count: usize },

    #[error("type mismatch at '{key}': cannot replace {existing} with {replacement}")]
    TypeMismatch {
        key: String,
        existing: &'static str,
        replacement: &'static str,
    },

    #[error("could not append to '{key}': key already exists, use plain '=' to overwrite, not '+='")]
    KeyExists { key: String },

    #[error("could not override '{key}': key not found (to add it use +{key}=...)")]
    KeyMissing { key: String },

    #[error("could not delete '{key}': current value {actual} does not match {expected}")]
    DeleteMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("sweep expands to more than {limit} jobs")]
    SweepTooLarge { limit: usize },

    #[error("working directory collision at {}: already claimed or not empty", path.display())]
    DirectoryCollision { path: PathBuf },

    #[error("working directory template '{template}' did not produce a path: {reason}")]
    InvalidWorkingDir { template: String, reason: String },

    #[error("IO error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl CompositionError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        CompositionError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while resolving `${...}` expressions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpolationError {
    #[error("cyclic reference while resolving '{path}' ({chain})")]
    Cycle { path: String, chain: String },

    #[error("interpolation '{reference}' at '{from}' refers to a missing key")]
    UnresolvedReference { reference: String, from: String },

    #[error("unknown resolver '{name}' at '{from}'")]
    UnknownResolver { name: String, from: String },

    #[error("resolver '{name}' failed at '{from}': {reason}")]
    Resolver {
        name: String,
        from: String,
        reason: String,
    },

    #[error("malformed interpolation at '{from}': {reason}")]
    Syntax { from: String, reason: String },
}

/// A failure raised by the external job callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id} failed: {message}")]
pub struct JobExecutionError {
    pub job_id: String,
    pub message: String,
}

/// Crate-level error for the steps that run before any job exists
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Override(#[from] OverrideSyntaxError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Job(JobError),
}

impl From<JobError> for Error {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Composition(e) => Error::Composition(e),
            JobError::Interpolation(e) => Error::Interpolation(e),
            other => Error::Job(other),
        }
    }
}

impl Error {
    /// Stable process exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Override(_) => ExitCode::OverrideSyntax,
            Error::Composition(_) => ExitCode::Composition,
            Error::Interpolation(_) => ExitCode::Interpolation,
            Error::Store(_) | Error::Settings(_) | Error::Io(_) | Error::Serialization(_) => {
                ExitCode::Config
            }
            Error::Job(e) => e.failure_kind().exit_code(),
        }
    }
}
