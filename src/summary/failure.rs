//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Job/run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Job completed successfully
    Success,
    /// Job failed during composition, resolution or execution
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl Status {
    /// Get the default exit code for this status
    pub fn default_exit_code(&self) -> ExitCode {
        match self {
            Status::Success => ExitCode::Success,
            Status::Failed => ExitCode::JobExecution,
            Status::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Check if this is a terminal failure state
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Cancelled)
    }
}

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Merge, selection or working-directory failure
    Composition,
    /// `${...}` resolution failure
    Interpolation,
    /// The job callback failed
    Execution,
    /// Job was cancelled
    Cancelled,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Composition => ExitCode::Composition,
            FailureKind::Interpolation => ExitCode::Interpolation,
            FailureKind::Execution => ExitCode::JobExecution,
            FailureKind::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Composition => "Config composition failed",
            FailureKind::Interpolation => "Interpolation failed",
            FailureKind::Execution => "Job callback failed",
            FailureKind::Cancelled => "Job cancelled",
        }
    }
}

/// Stable exit codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful execution
    #[default]
    Success = 0,
    /// Malformed override
    OverrideSyntax = 10,
    /// Config composition failed
    Composition = 20,
    /// Interpolation failed
    Interpolation = 30,
    /// A job callback failed
    JobExecution = 40,
    /// Config files or engine settings could not be loaded
    Config = 50,
    /// Run was cancelled
    Cancelled = 80,
}

impl ExitCode {
    /// Get the integer value of the exit code
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Create from integer value
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            10 => Some(ExitCode::OverrideSyntax),
            20 => Some(ExitCode::Composition),
            30 => Some(ExitCode::Interpolation),
            40 => Some(ExitCode::JobExecution),
            50 => Some(ExitCode::Config),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    /// Check if this exit code indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Aggregates job outcomes into a run status.
///
/// Cancellation wins over failure; otherwise the first failure (in job
/// order) decides the exit code.
#[derive(Debug, Default)]
pub struct ExitCodeAggregator {
    has_cancelled: bool,
    first_failure_code: Option<ExitCode>,
}

impl ExitCodeAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job's status and exit code to the aggregation
    pub fn add(&mut self, status: Status, exit_code: ExitCode) {
        match status {
            Status::Cancelled => {
                self.has_cancelled = true;
            }
            Status::Failed => {
                if self.first_failure_code.is_none() {
                    self.first_failure_code = Some(exit_code);
                }
            }
            Status::Success => {}
        }
    }

    /// Get the aggregated status
    pub fn status(&self) -> Status {
        if self.has_cancelled {
            Status::Cancelled
        } else if self.first_failure_code.is_some() {
            Status::Failed
        } else {
            Status::Success
        }
    }

    /// Get the aggregated exit code
    pub fn exit_code(&self) -> ExitCode {
        if self.has_cancelled {
            ExitCode::Cancelled
        } else if let Some(code) = self.first_failure_code {
            code
        } else {
            ExitCode::Success
        }
    }
}
