//! Job summary (summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::failure::{ExitCode, FailureKind, Status};

/// Schema version for summary.json
pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for summary.json
pub const SUMMARY_SCHEMA_ID: &str = "plab/summary@1";

/// Identity of the job a summary describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentity {
    /// Parent run identifier
    pub run_id: String,

    /// Job identifier
    pub job_id: String,

    /// Position in the sweep (0-based)
    pub num: usize,

    /// Literal overrides of this job
    pub overrides: Vec<String>,
}

/// Job summary (summary.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    #[serde(flatten)]
    pub identity: JobIdentity,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Job status
    pub status: Status,

    /// Failure kind (when status is not success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Stable exit code
    pub exit_code: i32,

    /// Working directory (once claimed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Digest of the resolved config (once resolved)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,

    /// Human-readable summary
    pub human_summary: String,

    /// Wall-clock job duration in milliseconds
    pub duration_ms: u64,
}

impl JobSummary {
    fn base(identity: JobIdentity, status: Status, exit_code: ExitCode, human_summary: String, duration_ms: u64) -> Self {
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION,
            schema_id: SUMMARY_SCHEMA_ID.to_string(),
            identity,
            created_at: Utc::now(),
            status,
            failure_kind: None,
            exit_code: exit_code.as_i32(),
            working_dir: None,
            config_digest: None,
            human_summary,
            duration_ms,
        }
    }

    /// Create a new success summary
    pub fn success(identity: JobIdentity, duration_ms: u64) -> Self {
        Self::base(
            identity,
            Status::Success,
            ExitCode::Success,
            "Job succeeded".to_string(),
            duration_ms,
        )
    }

    /// Create a new failure summary
    pub fn failure(identity: JobIdentity, failure_kind: FailureKind, human_summary: String, duration_ms: u64) -> Self {
        let mut summary = Self::base(
            identity,
            Status::Failed,
            failure_kind.exit_code(),
            human_summary,
            duration_ms,
        );
        summary.failure_kind = Some(failure_kind);
        summary
    }

    /// Create a cancelled summary
    pub fn cancelled(identity: JobIdentity, duration_ms: u64) -> Self {
        let mut summary = Self::base(
            identity,
            Status::Cancelled,
            ExitCode::Cancelled,
            "Job cancelled".to_string(),
            duration_ms,
        );
        summary.failure_kind = Some(FailureKind::Cancelled);
        summary
    }

    /// Record the working directory
    pub fn with_working_dir(mut self, dir: Option<&Path>) -> Self {
        self.working_dir = dir.map(|d| d.display().to_string());
        self
    }

    /// Record the resolved config digest
    pub fn with_config_digest(mut self, digest: Option<String>) -> Self {
        self.config_digest = digest;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.identity.job_id
    }

    pub fn num(&self) -> usize {
        self.identity.num
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

    /// Get the exit code as ExitCode enum
    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }
}
