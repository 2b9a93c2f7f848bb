//! Jobs: one point of a sweep carried from composition to a terminal state

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plab_override::Override;

use crate::config::{apply_overrides, deep_merge, DefaultsList, ResolvedConfig};
use crate::error::{CompositionError, InterpolationError, JobExecutionError};
use crate::interp::Interpolator;
use crate::state::{JobState, JobStateData};
use crate::summary::{FailureKind, JobIdentity, JobSummary};

/// Generate a new job_id using ULID (sortable, filesystem-safe)
pub fn generate_job_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Generate a new run_id using ULID (sortable, filesystem-safe)
pub fn generate_run_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Why a job did not succeed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Execution(#[from] JobExecutionError),

    #[error("job cancelled")]
    Cancelled,

    #[error("job state error: {0}")]
    State(String),
}

impl JobError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            JobError::Composition(_) => FailureKind::Composition,
            JobError::Interpolation(_) => FailureKind::Interpolation,
            JobError::Execution(_) | JobError::State(_) => FailureKind::Execution,
            JobError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Render a job's overrides as a directory-name fragment.
///
/// Overrides are sorted so the name does not depend on command-line order.
pub fn override_dirname(overrides: &[Override]) -> String {
    let mut items: Vec<String> = overrides.iter().map(|o| o.raw.clone()).collect();
    items.sort();
    items
        .join(",")
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// A single job of a run
#[derive(Debug, Clone)]
pub struct Job {
    state: JobStateData,
    /// Group selections and value overrides of this sweep point
    overrides: Vec<Override>,
    /// Overrides applied to the merged tree at compose time
    value_overrides: Vec<Override>,
    defaults: DefaultsList,
    base: Arc<Value>,
    resolved: Option<ResolvedConfig>,
    working_dir: Option<PathBuf>,
    error: Option<JobError>,
}

impl Job {
    pub fn new(
        run_id: &str,
        num: usize,
        overrides: Vec<Override>,
        value_overrides: Vec<Override>,
        defaults: DefaultsList,
        base: Arc<Value>,
    ) -> Self {
        Self {
            state: JobStateData::new(run_id.to_string(), generate_job_id(), num),
            overrides,
            value_overrides,
            defaults,
            base,
            resolved: None,
            working_dir: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.state.job_id
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn num(&self) -> usize {
        self.state.num
    }

    pub fn state(&self) -> JobState {
        self.state.state
    }

    pub fn state_data(&self) -> &JobStateData {
        &self.state
    }

    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    /// Literal override strings, in command-line order
    pub fn literal_overrides(&self) -> Vec<String> {
        self.overrides.iter().map(|o| o.raw.clone()).collect()
    }

    pub fn defaults(&self) -> &DefaultsList {
        &self.defaults
    }

    /// Tree produced by the defaults list, before value overrides
    pub fn base(&self) -> &Value {
        &self.base
    }

    pub fn resolved(&self) -> Option<&ResolvedConfig> {
        self.resolved.as_ref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn override_dirname(&self) -> String {
        override_dirname(&self.overrides)
    }

    /// Merge value overrides into the base tree and resolve interpolations.
    ///
    /// On error the job is left FAILED with the error recorded.
    pub fn compose(&mut self, interpolator: &Interpolator) -> Result<&ResolvedConfig, JobError> {
        self.advance(JobState::Composing)?;

        let merged = match apply_overrides(&self.base, &self.value_overrides) {
            Ok(tree) => tree,
            Err(e) => return Err(self.fail(e.into())),
        };

        let tree = match interpolator.resolve(&merged) {
            Ok(tree) => tree,
            Err(e) => return Err(self.fail(e.into())),
        };

        let resolved = ResolvedConfig::new(tree);
        self.state.config_digest = Some(resolved.digest());
        self.advance(JobState::Resolved)?;
        Ok(&*self.resolved.insert(resolved))
    }

    /// Resolved config plus a `plab.job` node, used to render directory templates
    pub fn template_context(&self, name: &str) -> Value {
        let job = json!({
            "plab": {
                "job": {
                    "num": self.num(),
                    "id": self.id(),
                    "name": name,
                    "override_dirname": self.override_dirname(),
                }
            }
        });
        let config = self
            .resolved
            .as_ref()
            .map(|r| r.as_value().clone())
            .unwrap_or_else(|| Value::Object(Default::default()));
        deep_merge(config, job)
    }

    /// Record the claimed working directory and move to RUNNING
    pub fn start(&mut self, dir: PathBuf) -> Result<(), JobError> {
        self.working_dir = Some(dir);
        self.advance(JobState::Running)
    }

    pub fn succeed(&mut self) -> Result<(), JobError> {
        self.advance(JobState::Succeeded)
    }

    /// Move to FAILED (or CANCELLED for a cancellation) and keep the error.
    ///
    /// Returns the error so callers can propagate it.
    pub fn fail(&mut self, error: JobError) -> JobError {
        let target = if matches!(error, JobError::Cancelled) {
            JobState::Cancelled
        } else {
            JobState::Failed
        };
        if !self.state.is_terminal() {
            // Non-terminal states always reach FAILED/CANCELLED
            let _ = self.state.transition(target);
        }
        self.error = Some(error.clone());
        error
    }

    pub fn cancel(&mut self) {
        self.fail(JobError::Cancelled);
    }

    fn advance(&mut self, target: JobState) -> Result<(), JobError> {
        match self.state.transition(target) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(JobError::State(e.to_string()))),
        }
    }

    fn identity(&self) -> JobIdentity {
        JobIdentity {
            run_id: self.run_id().to_string(),
            job_id: self.id().to_string(),
            num: self.num(),
            overrides: self.literal_overrides(),
        }
    }

    /// Summary of the job's outcome. A job that never reached a terminal state
    /// is reported as cancelled.
    pub fn summary(&self, duration_ms: u64) -> JobSummary {
        let summary = match (&self.state.state, &self.error) {
            (JobState::Succeeded, _) => JobSummary::success(self.identity(), duration_ms),
            (JobState::Failed, Some(err)) => JobSummary::failure(
                self.identity(),
                err.failure_kind(),
                err.to_string(),
                duration_ms,
            ),
            (JobState::Failed, None) => JobSummary::failure(
                self.identity(),
                FailureKind::Execution,
                "job failed".to_string(),
                duration_ms,
            ),
            _ => JobSummary::cancelled(self.identity(), duration_ms),
        };
        summary
            .with_working_dir(self.working_dir())
            .with_config_digest(self.state.config_digest.clone())
    }
}
