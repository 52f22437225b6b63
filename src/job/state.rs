//! Job lifecycle state machine and the status record shared with callers.
//!
//! [`JobState`] moves strictly forward; [`JobStatus`] refuses any other
//! transition so a terminal state is recorded exactly once.
//!
//! [`SharedJobStatus`] is a type alias for `Arc<Mutex<JobStatus>>`: the job
//! task writes it, the [`JobHandle`](super::JobHandle) reads it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::engine::ProcessOutcome;

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// States of one processing job.
///
/// ```text
/// Pending ──dispatch──▶ Running ──ok──▶ Completed
///    │                     └──error──▶ Failed
///    └──rejected before dispatch──────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Accepted; no engine work yet.
    Pending,
    /// An engine is transforming the file.
    Running,
    /// The output file is complete.
    Completed,
    /// The job ended without a usable output.
    Failed,
}

impl JobState {
    /// Returns `true` once the job can no longer change.
    ///
    /// ```
    /// use slowdown::job::JobState;
    ///
    /// assert!(!JobState::Pending.is_terminal());
    /// assert!(!JobState::Running.is_terminal());
    /// assert!(JobState::Completed.is_terminal());
    /// assert!(JobState::Failed.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Pending
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Everything a caller can observe about a job while it runs.
#[derive(Debug, Clone, Default)]
pub struct JobStatus {
    pub state: JobState,
    /// Set once the output file is known to exist.
    pub output: Option<PathBuf>,
    /// Set when the job fails.
    pub error_message: Option<String>,
    pub outcome: Option<ProcessOutcome>,
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Thread-safe handle to [`JobStatus`].
///
/// Do **not** hold the lock across `.await` points.
pub type SharedJobStatus = Arc<Mutex<JobStatus>>;

pub fn new_shared_status() -> SharedJobStatus {
    Arc::new(Mutex::new(JobStatus::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
