//! Job lifecycle state machine.
//!
//! This module is a pure, dependency-free validator and applier of job
//! lifecycle transitions. It never performs IO: [`transition`] takes a job by
//! reference and returns a new record on success, so a rejected transition
//! can never leave a half-mutated job behind.
//!
//! # Allowed transitions
//!
//! ```text
//! created ──▶ running ──▶ completed
//!               │  ▲  ╲──▶ failed
//!               ▼  │   ╲─▶ cancelled
//!             paused ─────▶ cancelled
//! ```
//!
//! `completed`, `failed` and `cancelled` are terminal: no outgoing edges.

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether this state has no outgoing transitions.
    ///
    /// Pure query with no side effects.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A background job record.
///
/// Mutated only through [`transition`]; destroyed (or archived) once terminal
/// and acknowledged by all observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    /// Owner of the job
    pub user_id: String,

    /// Job type tag (e.g., "export", "crawl")
    #[serde(rename = "type")]
    pub job_type: String,

    /// Current lifecycle state
    pub state: JobState,

    /// Progress percentage, 0-100
    pub progress: u32,

    /// Human-readable description of the current step
    pub step: String,

    /// Unix timestamp of creation (milliseconds)
    pub created_at: i64,

    /// Unix timestamp of last activity (milliseconds)
    pub last_activity: i64,

    /// Stamped the first time the job enters `running`
    pub started_at: Option<i64>,

    /// Stamped when the job enters a terminal state
    pub completed_at: Option<i64>,
}

impl Job {
    /// Create a new job in the `created` state.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            job_type: job_type.into(),
            state: JobState::Created,
            progress: 0,
            step: String::new(),
            created_at: now,
            last_activity: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Check whether a transition from `from` to `to` is in the allowed edge set.
fn is_allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Created, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Cancelled)
    )
}

/// Apply a lifecycle transition to a job.
///
/// On success returns a new [`Job`] record with the target state applied and
/// the relevant timestamps stamped: `started_at` the first time the job
/// enters `running`, `completed_at` on entering any terminal state.
///
/// # Errors
///
/// Returns [`DriftError::InvalidTransition`] for any edge not in the allowed
/// set, including all edges out of terminal states. The input job is never
/// modified.
pub fn transition(job: &Job, target: JobState) -> Result<Job> {
    if !is_allowed(job.state, target) {
        return Err(DriftError::InvalidTransition {
            from: job.state.to_string(),
            to: target.to_string(),
        });
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut next = job.clone();
    next.state = target;
    next.last_activity = now;

    if target == JobState::Running && next.started_at.is_none() {
        next.started_at = Some(now);
    }
    if target.is_terminal() {
        next.completed_at = Some(now);
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_in(state: JobState) -> Job {
        let mut job = Job::new("job-1", "user-1", "export");
        job.state = state;
        job
    }

    #[test]
    fn test_full_lifecycle() {
        let job = Job::new("job-1", "user-1", "export");
        assert_eq!(job.state, JobState::Created);
        assert!(job.started_at.is_none());

        let job = transition(&job, JobState::Running).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());
        let first_start = job.started_at;

        let job = transition(&job, JobState::Paused).unwrap();
        let job = transition(&job, JobState::Running).unwrap();
        // started_at is stamped only on the first entry into running
        assert_eq!(job.started_at, first_start);

        let job = transition(&job, JobState::Completed).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_created_to_completed_rejected() {
        let job = Job::new("job-1", "user-1", "export");
        let err = transition(&job, JobState::Completed).unwrap_err();
        assert!(matches!(err, DriftError::InvalidTransition { .. }));
        // Input job unchanged
        assert_eq!(job.state, JobState::Created);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_no_transitions_out_of_terminal_states() {
        let all = [
            JobState::Created,
            JobState::Running,
            JobState::Paused,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ];
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            let job = job_in(terminal);
            for target in all {
                let result = transition(&job, target);
                assert!(
                    result.is_err(),
                    "expected {} -> {} to be rejected",
                    terminal,
                    target
                );
                assert_eq!(job.state, terminal);
            }
        }
    }

    #[test]
    fn test_paused_can_only_resume_or_cancel() {
        let job = job_in(JobState::Paused);
        assert!(transition(&job, JobState::Running).is_ok());
        assert!(transition(&job, JobState::Cancelled).is_ok());
        assert!(transition(&job, JobState::Completed).is_err());
        assert!(transition(&job, JobState::Failed).is_err());
        assert!(transition(&job, JobState::Created).is_err());
    }

    #[test]
    fn test_is_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Paused.is_terminal());
    }

    #[test]
    fn test_cancel_from_running() {
        let job = job_in(JobState::Running);
        let job = transition(&job, JobState::Cancelled).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.completed_at.is_some());
    }
}
