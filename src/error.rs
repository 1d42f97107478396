//! Error types.  A goal's own failure is a `GoalError` handed to `am_done`;
//! a `SchedulerError` means the session itself cannot continue.

use crate::build_result::BuildStatus;
use thiserror::Error;

/// Structured error attached to a failed goal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{msg}")]
pub struct GoalError {
    pub status: BuildStatus,
    pub msg: String,
}

impl GoalError {
    pub fn new(status: BuildStatus, msg: impl Into<String>) -> Self {
        GoalError {
            status,
            msg: msg.into(),
        }
    }

    pub fn timed_out(msg: impl Into<String>) -> Self {
        GoalError::new(BuildStatus::TimedOut, msg)
    }
}

/// Conditions that abort a whole scheduling session.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Goals remain busy but nothing can make progress.
    #[error("deadlock: no goal can make progress ({})", stuck.join(", "))]
    Deadlock { stuck: Vec<String> },

    #[error("goal '{goal}' finished twice")]
    AlreadyDone { goal: String },

    #[error("goal '{goal}' finished with a non-terminal exit code")]
    NotTerminal { goal: String },

    #[error("goal '{goal}' cannot wait for itself")]
    SelfWaitee { goal: String },

    #[error("unable to start any build; max jobs is 0")]
    NoBuildSlots,

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
