//! Status enums for remote Tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a remote Task.
///
/// ```text
/// Created -> Staged -> Submitted -> Running -> Accepted
///    \          \           \           \
///     +----------+-----------+-----------+--> Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Invocation unit assembled, no I/O yet.
    #[default]
    Created,
    /// Blobs written to the local staging area.
    Staged,
    /// Handed to the marketplace engine's task queue.
    Submitted,
    /// A worker is executing the task's batch.
    Running,
    /// Batch committed and the output accepted.
    Accepted,
    /// Any step failed; the session was abandoned.
    Failed,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Created, Staged) | (Staged, Submitted) | (Submitted, Running) | (Running, Accepted) => {
                true
            }
            // Re-staging overwrites the same artifacts.
            (Staged, Staged) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Acceptance state as seen by the marketplace engine.
    pub fn acceptance(&self) -> Acceptance {
        match self {
            Self::Accepted => Acceptance::Accepted,
            _ => Acceptance::Pending,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Staged => "STAGED",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Accepted => "ACCEPTED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Whether the engine has accepted a task's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    #[default]
    Pending,
    Accepted,
}
