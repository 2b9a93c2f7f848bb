//! Job state machine
//!
//! Job states: PENDING → COMPOSING → RESOLVED → RUNNING → {SUCCEEDED | FAILED}
//! with CANCELLED reachable from every non-terminal state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now_rfc3339, TerminalState};

/// Schema version for job_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "plab/job_state@1";

/// File name inside the artifact directory
pub const FILE_NAME: &str = "job_state.json";

/// Job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Planned, waiting for a worker
    Pending,
    /// Base tree and overrides being merged
    Composing,
    /// Config fully resolved
    Resolved,
    /// Callback executing
    Running,
    /// Callback returned normally
    Succeeded,
    /// Composition, resolution or the callback failed
    Failed,
    /// Cancelled before or while running
    Cancelled,
}

impl TerminalState for JobState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl JobState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        match (self, target) {
            (JobState::Pending, JobState::Composing) => true,
            (JobState::Composing, JobState::Resolved) => true,
            (JobState::Resolved, JobState::Running) => true,
            (JobState::Running, JobState::Succeeded) => true,

            // Any non-terminal state can fail or be cancelled
            (from, JobState::Failed | JobState::Cancelled) => !from.is_terminal(),

            _ => false,
        }
    }
}

/// Job state artifact data (job_state.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStateData {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier (parent run)
    pub run_id: String,

    /// Job identifier
    pub job_id: String,

    /// Position in the sweep (0-based)
    pub num: usize,

    /// Current state
    pub state: JobState,

    /// Digest of the resolved config, once resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for job state operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl JobStateData {
    /// Create a new job in PENDING state
    pub fn new(run_id: String, job_id: String, num: usize) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            job_id,
            num,
            state: JobState::Pending,
            config_digest: None,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobState) -> Result<(), JobStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = now_rfc3339();
        self.seq = next_seq();

        Ok(())
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), JobStateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, JobStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write into an artifact directory as job_state.json
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), JobStateError> {
        self.write_to_file(&dir.join(FILE_NAME))
    }
}
