//! Job state machine
//!
//! PENDING → COMPOSING → RESOLVED → RUNNING → {SUCCEEDED | FAILED}
//! Every non-terminal state may also move to FAILED or CANCELLED.

mod job_state;

pub use job_state::{JobState, JobStateData, JobStateError, FILE_NAME as JOB_STATE_FILE};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering events within a single process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Get current UTC timestamp
pub fn now_rfc3339() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
