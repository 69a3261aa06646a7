//! Execution backends.
//!
//! A backend takes one [`InvocationUnit`] and produces its JSON result. The
//! dispatcher picks one backend when a function is wrapped and never looks at
//! which one it got again.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::staging::CallStage;
use crate::unit::InvocationUnit;

mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::{Dispatch, RemoteBackend, RemoteOptions};

/// An execution strategy for invocation units.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Stage `unit` in `stage`, execute it, and return the decoded result.
    async fn invoke(&self, unit: &InvocationUnit, stage: &CallStage) -> Result<Value>;
}
