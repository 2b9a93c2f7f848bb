//! Cancellation and signal handling (SIGINT/SIGTERM)
//!
//! On the first signal the run stops scheduling new jobs; jobs that never
//! started are recorded as CANCELLED and the run summary is still written.
//! On a second signal the process exits immediately with code 80.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::summary::ExitCode;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = ExitCode::Cancelled as i32;

/// Shared cancellation state
#[derive(Debug, Default)]
pub struct SignalState {
    /// Cancellation requested (first signal or programmatic cancel)
    cancel_requested: AtomicBool,
    /// Second signal received
    immediate_exit: AtomicBool,
    /// Signals received so far
    signal_count: AtomicU8,
    /// Job IDs currently running
    running_jobs: Mutex<Vec<String>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM) and return the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }

    fn register_job(&self, job_id: &str) {
        if let Ok(mut jobs) = self.running_jobs.lock() {
            jobs.push(job_id.to_string());
        }
    }

    fn unregister_job(&self, job_id: &str) {
        if let Ok(mut jobs) = self.running_jobs.lock() {
            jobs.retain(|id| id != job_id);
        }
    }

    fn running_jobs(&self) -> Vec<String> {
        self.running_jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop scheduling, let the run wind down
    InitiateCancellation,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Cloneable handle used to request and observe cancellation
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<SignalState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.state.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancel_requested()
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Track a job while its callback runs
    pub fn register_job(&self, job_id: &str) {
        self.state.register_job(job_id);
    }

    pub fn unregister_job(&self, job_id: &str) {
        self.state.unregister_job(job_id);
    }

    /// IDs of jobs whose callback is running
    pub fn running_jobs(&self) -> Vec<String> {
        self.state.running_jobs()
    }
}

/// Installs the process signal handler for a token
pub struct SignalHandler {
    token: CancelToken,
}

impl SignalHandler {
    pub fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Install the handlers for SIGINT and SIGTERM.
    ///
    /// Must be called at most once per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = self.token.state();
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                tracing::warn!(
                    running = ?state.running_jobs(),
                    "interrupt received, cancelling run (press Ctrl-C again to exit now)"
                );
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}
