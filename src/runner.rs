//! Job runner
//!
//! Drives every job of a [`RunPlan`] through
//! PENDING → COMPOSING → RESOLVED → RUNNING → {SUCCEEDED | FAILED}
//! and aggregates the outcomes into a [`RunSummary`].
//!
//! Jobs are isolated: a job that fails to compose, resolve, claim its
//! directory or run its callback is recorded and the run carries on. With
//! `launcher.parallelism > 1` jobs run on a scoped worker pool; summaries are
//! keyed by job number so the result does not depend on completion order.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::callback::{JobCallback, JobContext};
use crate::compose::RunPlan;
use crate::config::{render_text, CancelPolicy, EngineSettings, ResolvedConfig};
use crate::error::{CompositionError, Error, JobExecutionError};
use crate::interp::{Interpolator, ResolverRegistry};
use crate::job::{Job, JobError};
use crate::signal::CancelToken;
use crate::state::JOB_STATE_FILE;
use crate::summary::{JobSummary, RunSummary, RUN_SUMMARY_FILE};

/// Resolved config file inside a job's artifact directory
pub const CONFIG_FILE: &str = "config.json";

/// Literal overrides file inside a job's artifact directory
pub const OVERRIDES_FILE: &str = "overrides.json";

/// Outcome of composing one job without running it
#[derive(Debug, Clone)]
pub struct DryRunJob {
    pub num: usize,
    pub overrides: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub result: Result<ResolvedConfig, JobError>,
}

/// Per-run state shared by all workers
struct RunContext<'a> {
    run_id: &'a str,
    interpolator: Interpolator<'a>,
    job_name: String,
    sweep_dir: Option<PathBuf>,
    callback: &'a dyn JobCallback,
    claimed: Mutex<HashSet<PathBuf>>,
}

/// Runs planned jobs
pub struct JobRunner {
    settings: EngineSettings,
    registry: ResolverRegistry,
    cancel: CancelToken,
    root_dir: PathBuf,
}

impl JobRunner {
    pub fn new(settings: EngineSettings, registry: ResolverRegistry) -> Self {
        Self {
            settings,
            registry,
            cancel: CancelToken::new(),
            root_dir: PathBuf::from("."),
        }
    }

    /// Share a cancel token (e.g. one wired to Ctrl-C)
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Directory that relative working-directory templates resolve against
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run every job of the plan and write the run summary.
    ///
    /// Only a sweep directory that cannot be resolved or created, or that
    /// already holds another run's output, fails the whole run; job failures
    /// are reported in the summary.
    pub fn run(&self, plan: RunPlan, callback: &dyn JobCallback) -> Result<RunSummary, Error> {
        let start = Instant::now();
        let interpolator = Interpolator::new(&self.registry);
        let job_name = self.job_name(&plan);

        let sweep_dir = if plan.multirun {
            let dir = self.sweep_dir(&interpolator, &plan.run_id, &job_name)?;
            if !self.settings.job.overwrite && is_non_empty_dir(&dir) {
                return Err(CompositionError::DirectoryCollision { path: dir }.into());
            }
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        let run = RunContext {
            run_id: &plan.run_id,
            interpolator,
            job_name,
            sweep_dir,
            callback,
            claimed: Mutex::new(HashSet::new()),
        };

        let workers = self.settings.launcher.parallelism.clamp(1, plan.jobs.len().max(1));
        info!(
            run_id = %plan.run_id,
            jobs = plan.jobs.len(),
            workers,
            sweep_dir = ?run.sweep_dir,
            "Starting run"
        );

        let summaries: Vec<JobSummary> = if workers == 1 {
            plan.jobs
                .into_iter()
                .map(|mut job| self.run_job(&run, &mut job))
                .collect()
        } else {
            self.run_parallel(&run, plan.jobs, workers)
        };

        let summary = RunSummary::from_job_summaries(
            plan.run_id.clone(),
            plan.multirun,
            summaries,
            start.elapsed().as_millis() as u64,
        );

        if let Some(dir) = &run.sweep_dir {
            let path = dir.join(RUN_SUMMARY_FILE);
            if let Err(e) = summary.write_to_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to write run summary");
            }
        }

        info!(
            run_id = %summary.run_id,
            succeeded = summary.jobs_succeeded,
            failed = summary.jobs_failed,
            cancelled = summary.jobs_cancelled,
            "{}",
            summary.human_summary
        );

        Ok(summary)
    }

    /// Compose and resolve every job and compute its working directory
    /// without creating anything on disk.
    pub fn dry_run(&self, plan: RunPlan) -> Result<Vec<DryRunJob>, Error> {
        let interpolator = Interpolator::new(&self.registry);
        let job_name = self.job_name(&plan);
        let sweep_dir = if plan.multirun {
            Some(self.sweep_dir(&interpolator, &plan.run_id, &job_name)?)
        } else {
            None
        };

        let mut outcomes = Vec::with_capacity(plan.jobs.len());
        for mut job in plan.jobs {
            let result = job.compose(&interpolator).cloned();
            let working_dir = match &result {
                Ok(_) => self
                    .working_dir(&interpolator, &job, &job_name, sweep_dir.as_deref())
                    .ok(),
                Err(_) => None,
            };
            outcomes.push(DryRunJob {
                num: job.num(),
                overrides: job.literal_overrides(),
                working_dir,
                result,
            });
        }
        Ok(outcomes)
    }

    fn job_name(&self, plan: &RunPlan) -> String {
        self.settings
            .job
            .name
            .clone()
            .unwrap_or_else(|| plan.config_name.clone())
    }

    fn run_parallel(&self, run: &RunContext<'_>, jobs: Vec<Job>, workers: usize) -> Vec<JobSummary> {
        let slots: Vec<Mutex<Option<Job>>> = jobs.into_iter().map(|j| Mutex::new(Some(j))).collect();
        let next = AtomicUsize::new(0);
        let results: Mutex<BTreeMap<usize, JobSummary>> = Mutex::new(BTreeMap::new());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(slot) = slots.get(idx) else {
                        break;
                    };
                    let taken = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
                    let Some(mut job) = taken else {
                        continue;
                    };
                    let summary = self.run_job(run, &mut job);
                    results
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(summary.num(), summary);
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .into_values()
            .collect()
    }

    /// Drive one job to a terminal state and summarize it
    fn run_job(&self, run: &RunContext<'_>, job: &mut Job) -> JobSummary {
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            debug!(job_id = %job.id(), num = job.num(), "Skipping job, run cancelled");
            job.cancel();
            return job.summary(0);
        }

        match self.execute(run, job) {
            Ok(()) => info!(job_id = %job.id(), num = job.num(), "Job finished"),
            Err(JobError::Cancelled) => warn!(job_id = %job.id(), num = job.num(), "Job cancelled"),
            Err(e) => error!(job_id = %job.id(), num = job.num(), error = %e, "Job failed"),
        }

        if let Some(dir) = job.working_dir() {
            let artifact_dir = dir.join(&self.settings.output_subdir);
            if let Err(e) = job.state_data().write_to_dir(&artifact_dir) {
                warn!(job_id = %job.id(), error = %e, "Failed to write {}", JOB_STATE_FILE);
            }
        }

        job.summary(started.elapsed().as_millis() as u64)
    }

    fn execute(&self, run: &RunContext<'_>, job: &mut Job) -> Result<(), JobError> {
        let resolved = job.compose(&run.interpolator)?.clone();

        let dir = self
            .working_dir(&run.interpolator, job, &run.job_name, run.sweep_dir.as_deref())
            .map_err(|e| job.fail(e))?;
        self.claim(run, &dir).map_err(|e| job.fail(e.into()))?;

        let artifact_dir = dir.join(&self.settings.output_subdir);
        fs::create_dir_all(&artifact_dir)
            .map_err(|e| job.fail(CompositionError::io(&artifact_dir, e).into()))?;

        job.start(dir.clone())?;
        info!(job_id = %job.id(), num = job.num(), dir = %dir.display(), "Job started");

        self.write_artifacts(job, &resolved, &artifact_dir)
            .map_err(|e| job.fail(e.into()))?;

        let ctx = JobContext::new(run.run_id, job.id(), job.num(), self.cancel.clone());
        self.cancel.register_job(job.id());
        let outcome = catch_unwind(AssertUnwindSafe(|| run.callback.run(&resolved, &dir, &ctx)));
        self.cancel.unregister_job(job.id());

        let abandoned =
            self.settings.launcher.cancel_policy == CancelPolicy::Abandon && self.cancel.is_cancelled();
        if abandoned {
            return Err(job.fail(JobError::Cancelled));
        }

        let message = match outcome {
            Ok(Ok(())) => return job.succeed(),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        let failure = JobExecutionError {
            job_id: job.id().to_string(),
            message,
        };
        Err(job.fail(failure.into()))
    }

    fn write_artifacts(
        &self,
        job: &Job,
        resolved: &ResolvedConfig,
        artifact_dir: &Path,
    ) -> Result<(), CompositionError> {
        let config_path = artifact_dir.join(CONFIG_FILE);
        resolved
            .write_to_file(&config_path)
            .map_err(|e| CompositionError::io(&config_path, e))?;

        let overrides_path = artifact_dir.join(OVERRIDES_FILE);
        let overrides = serde_json::to_string_pretty(&job.literal_overrides()).map_err(|e| {
            CompositionError::Io {
                path: overrides_path.clone(),
                message: e.to_string(),
            }
        })?;
        fs::write(&overrides_path, overrides).map_err(|e| CompositionError::io(&overrides_path, e))?;

        job.state_data()
            .write_to_dir(artifact_dir)
            .map_err(|e| CompositionError::Io {
                path: artifact_dir.join(JOB_STATE_FILE),
                message: e.to_string(),
            })
    }

    /// Reserve `dir` for one job of this run
    fn claim(&self, run: &RunContext<'_>, dir: &Path) -> Result<(), CompositionError> {
        let mut claimed = run.claimed.lock().unwrap_or_else(|p| p.into_inner());
        let occupied = !self.settings.job.overwrite && is_non_empty_dir(dir);
        if claimed.contains(dir) || occupied {
            return Err(CompositionError::DirectoryCollision {
                path: dir.to_path_buf(),
            });
        }
        claimed.insert(dir.to_path_buf());
        Ok(())
    }

    fn sweep_dir(&self, interpolator: &Interpolator<'_>, run_id: &str, job_name: &str) -> Result<PathBuf, Error> {
        let context = json!({
            "plab": {
                "run": {"id": run_id},
                "job": {"name": job_name},
            }
        });
        let dir = template_path(interpolator, &self.settings.sweep.dir, &context).map_err(Error::from)?;
        Ok(self.root_dir.join(dir))
    }

    fn working_dir(
        &self,
        interpolator: &Interpolator<'_>,
        job: &Job,
        job_name: &str,
        sweep_dir: Option<&Path>,
    ) -> Result<PathBuf, JobError> {
        let context = job.template_context(job_name);
        match sweep_dir {
            Some(sweep) => Ok(sweep.join(template_path(interpolator, &self.settings.sweep.subdir, &context)?)),
            None => Ok(self
                .root_dir
                .join(template_path(interpolator, &self.settings.run.dir, &context)?)),
        }
    }
}

/// Resolve a directory template to a path
fn template_path(interpolator: &Interpolator<'_>, template: &str, context: &Value) -> Result<PathBuf, JobError> {
    let invalid = |reason: &str| {
        JobError::Composition(CompositionError::InvalidWorkingDir {
            template: template.to_string(),
            reason: reason.to_string(),
        })
    };

    let value = interpolator.resolve_template(template, context)?;
    let text = match &value {
        Value::Object(_) | Value::Array(_) => return Err(invalid("resolved to a map or sequence")),
        Value::Null => return Err(invalid("resolved to null")),
        scalar => render_text(scalar),
    };
    if text.trim().is_empty() {
        return Err(invalid("resolved to an empty path"));
    }
    Ok(PathBuf::from(text))
}

fn is_non_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("callback panicked: {}", s)
    } else {
        "callback panicked".to_string()
    }
}
