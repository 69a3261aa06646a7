//! In-process execution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::Backend;
use crate::callable::{self, Registry};
use crate::codec;
use crate::error::Result;
use crate::staging::CallStage;
use crate::unit::InvocationUnit;

/// Runs the callable in this process.
///
/// The unit still goes through staging and is read back from disk, so this
/// path exercises exactly the blobs a worker would receive.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    namespace: Arc<Registry>,
}

impl LocalBackend {
    pub fn new(namespace: Arc<Registry>) -> Self {
        Self { namespace }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn invoke(&self, unit: &InvocationUnit, stage: &CallStage) -> Result<Value> {
        let staged = stage.stage(unit).await?;

        let blob = tokio::fs::read(&staged.callable).await?;
        let callable = callable::deserialize(&blob, self.namespace.clone())?;

        let mut args = Vec::with_capacity(staged.args.len());
        for path in &staged.args {
            args.push(codec::decode(&tokio::fs::read(path).await?)?);
        }

        debug!(call_id = %stage.call_id(), target_handler = %callable.target(), "Invoking locally");
        callable.invoke(args)
    }
}
