//! Job callbacks
//!
//! The runner hands every resolved job to a [`JobCallback`]. Closures work
//! directly; [`CommandCallback`] runs an external command per job.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::config::ResolvedConfig;
use crate::signal::CancelToken;

/// Error type returned by callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of the job a callback is running for
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: String,
    pub job_id: String,
    pub num: usize,
    cancel: CancelToken,
}

impl JobContext {
    pub fn new(run_id: &str, job_id: &str, num: usize, cancel: CancelToken) -> Self {
        Self {
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            num,
            cancel,
        }
    }

    /// True once the run has been cancelled. Long callbacks should poll this
    /// and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Work performed for each job.
///
/// The working directory exists and the config has no `${...}` expressions
/// left when this is called. Text written as `\${...}` in a config comes
/// through as a literal `${...}` string and is not resolved again.
pub trait JobCallback: Sync {
    fn run(&self, config: &ResolvedConfig, dir: &Path, ctx: &JobContext) -> Result<(), CallbackError>;
}

impl<F> JobCallback for F
where
    F: Fn(&ResolvedConfig, &Path, &JobContext) -> Result<(), CallbackError> + Sync,
{
    fn run(&self, config: &ResolvedConfig, dir: &Path, ctx: &JobContext) -> Result<(), CallbackError> {
        self(config, dir, ctx)
    }
}

/// Environment variable holding the path of the resolved config
pub const ENV_CONFIG: &str = "PLAB_CONFIG";
pub const ENV_JOB_ID: &str = "PLAB_JOB_ID";
pub const ENV_JOB_NUM: &str = "PLAB_JOB_NUM";
pub const ENV_JOB_DIR: &str = "PLAB_JOB_DIR";

/// Runs an external command inside each job directory
#[derive(Debug, Clone)]
pub struct CommandCallback {
    program: String,
    args: Vec<String>,
    config_file: String,
}

impl CommandCallback {
    /// Build from `[program, args...]`. Returns `None` for an empty command.
    pub fn new(command: &[String], config_file: &str) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            config_file: config_file.to_string(),
        })
    }
}

impl JobCallback for CommandCallback {
    fn run(&self, _config: &ResolvedConfig, dir: &Path, ctx: &JobContext) -> Result<(), CallbackError> {
        debug!(job_id = %ctx.job_id, program = %self.program, "Spawning job command");

        // The child runs inside `dir`, so paths handed to it must not be
        // relative to our own working directory.
        let dir = dir
            .canonicalize()
            .map_err(|e| format!("job directory {}: {}", dir.display(), e))?;

        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&dir)
            .env(ENV_CONFIG, dir.join(&self.config_file))
            .env(ENV_JOB_ID, &ctx.job_id)
            .env(ENV_JOB_NUM, ctx.num.to_string())
            .env(ENV_JOB_DIR, &dir)
            .status()
            .map_err(|e| format!("failed to spawn '{}': {}", self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("'{}' exited with {}", self.program, status).into())
        }
    }
}
