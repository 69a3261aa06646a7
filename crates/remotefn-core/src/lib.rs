//! remotefn Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - The filesystem or network
//! - Any particular marketplace engine
//!
//! Everything here describes one remote invocation: how it is configured,
//! the task that carries it to a worker, and the events emitted along the way.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use config::{ImageSpec, InvocationConfig, DEFAULT_SUBNET};
pub use error::CoreError;
pub use event::{EngineEvent, EngineEventKind};
pub use ids::{CallId, TaskId};
pub use status::{Acceptance, TaskStatus};
pub use task::{Command, InputArtifact, OutputArtifact, Task};
