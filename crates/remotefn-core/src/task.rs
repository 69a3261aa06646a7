//! The remote Task and its artifacts.

use crate::{Acceptance, CallId, CoreError, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A local file bound to the remote path it is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArtifact {
    /// Path inside the local staging area.
    pub local: PathBuf,
    /// Path on the worker's filesystem.
    pub remote: String,
}

impl InputArtifact {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// The produced result, fetched from `remote` into `local`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub remote: String,
    pub local: PathBuf,
}

/// What the worker must execute: a program and its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Builder method to append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// One remote execution attempt against a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Call this task carries.
    pub call_id: CallId,

    /// Name of the handler being invoked.
    pub handler: String,

    /// Callable blob first, then the argument blobs in order.
    pub inputs: Vec<InputArtifact>,

    /// Entry point invocation on the worker.
    pub command: Command,

    /// Where the result is produced and downloaded to.
    pub output: OutputArtifact,

    /// Current lifecycle state.
    pub status: TaskStatus,

    /// Every state the task has been in, oldest first.
    pub history: Vec<TaskStatus>,

    /// Result payload set on acceptance (the downloaded output path).
    pub result: Option<PathBuf>,

    /// Error message if the task failed.
    pub error_message: Option<String>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new Task in the `Created` state.
    pub fn new(
        call_id: CallId,
        handler: impl Into<String>,
        inputs: Vec<InputArtifact>,
        command: Command,
        output: OutputArtifact,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            call_id,
            handler: handler.into(),
            inputs,
            command,
            output,
            status: TaskStatus::Created,
            history: vec![TaskStatus::Created],
            result: None,
            error_message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the task accepted with its downloaded output as the result.
    pub fn accept(&mut self, result: impl Into<PathBuf>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Accepted)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Mark the task failed. A task that already finished keeps its state.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.transition(TaskStatus::Failed).is_ok() {
            self.error_message = Some(error.into());
        }
    }

    pub fn acceptance(&self) -> Acceptance {
        self.status.acceptance()
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
