//! Progress events emitted by a marketplace session.

use crate::ids::TaskId;
use serde::{Deserialize, Serialize};

/// A progress event observed while a remote session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Task the event concerns, if any.
    pub task_id: Option<TaskId>,
    /// What happened.
    pub kind: EngineEventKind,
    /// Unix timestamp (milliseconds) when the event occurred.
    pub timestamp_ms: i64,
}

impl EngineEvent {
    /// Create a session-level event.
    pub fn session(kind: EngineEventKind) -> Self {
        Self::new(None, kind)
    }

    /// Create an event about one task.
    pub fn task(task_id: TaskId, kind: EngineEventKind) -> Self {
        Self::new(Some(task_id), kind)
    }

    fn new(task_id: Option<TaskId>, kind: EngineEventKind) -> Self {
        Self {
            task_id,
            kind,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
        }
    }
}

/// Type of engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    /// Execution package resolved for the image.
    PackageResolved { image_hash: String },
    /// Session opened on a subnet with a budget.
    SessionStarted { subnet: String, budget: f64 },
    /// A worker was provisioned for the session.
    WorkerAcquired { worker: String },
    /// Task entered the engine's queue.
    TaskSubmitted,
    /// A batch of transfers and commands was committed.
    BatchCommitted { cost: f64 },
    /// Task result accepted.
    TaskAccepted,
    /// Task abandoned.
    TaskFailed { error: String },
    /// Session closed, with the total amount spent.
    SessionFinished { spent: f64 },
}
