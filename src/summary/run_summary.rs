//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::failure::{ExitCode, ExitCodeAggregator, Status};
use super::job_summary::JobSummary;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "plab/run_summary@1";

/// File name of the run summary
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Run summary (run_summary.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Whether the run was a multirun sweep
    pub multirun: bool,

    /// Aggregated status
    pub status: Status,

    /// Aggregated exit code
    pub exit_code: i32,

    /// Total jobs in the run
    pub job_count: usize,

    /// Count of jobs with status=success
    pub jobs_succeeded: usize,

    /// Count of jobs with status=failed
    pub jobs_failed: usize,

    /// Count of jobs with status=cancelled
    pub jobs_cancelled: usize,

    /// Wall-clock duration of the entire run in milliseconds
    pub duration_ms: u64,

    /// Human-readable summary
    pub human_summary: String,

    /// Per-job summaries ordered by job number
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    /// Create a new run summary by aggregating job summaries.
    ///
    /// Jobs are ordered by job number, so the result does not depend on the
    /// order in which jobs finished.
    pub fn from_job_summaries(
        run_id: String,
        multirun: bool,
        mut jobs: Vec<JobSummary>,
        duration_ms: u64,
    ) -> Self {
        jobs.sort_by_key(JobSummary::num);

        let mut aggregator = ExitCodeAggregator::new();
        let mut jobs_succeeded = 0;
        let mut jobs_failed = 0;
        let mut jobs_cancelled = 0;

        for summary in &jobs {
            let exit_code = ExitCode::from_i32(summary.exit_code).unwrap_or(ExitCode::JobExecution);
            aggregator.add(summary.status, exit_code);

            match summary.status {
                Status::Success => jobs_succeeded += 1,
                Status::Failed => jobs_failed += 1,
                Status::Cancelled => jobs_cancelled += 1,
            }
        }

        let status = aggregator.status();
        let job_count = jobs.len();
        let human_summary =
            Self::generate_human_summary(status, job_count, jobs_succeeded, jobs_failed, jobs_cancelled);

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            multirun,
            status,
            exit_code: aggregator.exit_code().as_i32(),
            job_count,
            jobs_succeeded,
            jobs_failed,
            jobs_cancelled,
            duration_ms,
            human_summary,
            jobs,
        }
    }

    /// Generate a human-readable summary
    fn generate_human_summary(
        status: Status,
        job_count: usize,
        jobs_succeeded: usize,
        jobs_failed: usize,
        jobs_cancelled: usize,
    ) -> String {
        match status {
            Status::Success => {
                if job_count == 1 {
                    "Run succeeded".to_string()
                } else {
                    format!("Run succeeded: {}/{} jobs passed", jobs_succeeded, job_count)
                }
            }
            Status::Failed => {
                if job_count == 1 {
                    "Run failed".to_string()
                } else {
                    format!(
                        "Run failed: {} succeeded, {} failed, {} cancelled",
                        jobs_succeeded, jobs_failed, jobs_cancelled
                    )
                }
            }
            Status::Cancelled => format!(
                "Run cancelled: {} succeeded, {} failed, {} cancelled",
                jobs_succeeded, jobs_failed, jobs_cancelled
            ),
        }
    }

    /// Look up a job summary by job number
    pub fn job(&self, num: usize) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| j.num() == num)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }

    /// Get the exit code as ExitCode enum
    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }
}
