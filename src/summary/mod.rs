//! Job and run summaries with the failure taxonomy

mod failure;
mod job_summary;
mod run_summary;

pub use failure::{ExitCode, ExitCodeAggregator, FailureKind, Status};
pub use job_summary::{JobIdentity, JobSummary, SUMMARY_SCHEMA_ID, SUMMARY_SCHEMA_VERSION};
pub use run_summary::{RunSummary, RUN_SUMMARY_FILE, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION};
