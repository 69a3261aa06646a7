//! Wrapping a handler so calls look local.

use std::path::PathBuf;
use std::sync::Arc;

use remotefn_core::InvocationConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{Backend, LocalBackend, RemoteBackend, RemoteOptions};
use crate::callable::{self, Handler, Registry};
use crate::codec;
use crate::error::{InvocationError, Result};
use crate::market::{EventSink, Marketplace};
use crate::staging::StagingArea;
use crate::unit::InvocationUnit;

/// Arguments for one call.
///
/// Values are encoded as they are pushed; an encoding failure is reported
/// by the call, before anything is staged.
#[derive(Debug, Default)]
pub struct Args {
    positional: Vec<Result<Vec<u8>>>,
    named: Vec<String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn push<T: Serialize>(mut self, value: T) -> Self {
        self.positional.push(codec::encode(&value));
        self
    }

    /// Attach a named argument.
    ///
    /// Only positional arguments can be transported, so any call carrying a
    /// named argument is rejected with [`InvocationError::KeywordArguments`].
    pub fn named<T: Serialize>(mut self, name: impl Into<String>, _value: T) -> Self {
        self.named.push(name.into());
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    fn into_blobs(self) -> Result<Vec<Vec<u8>>> {
        if !self.named.is_empty() {
            return Err(InvocationError::KeywordArguments(self.named));
        }
        self.positional.into_iter().collect()
    }
}

/// Build [`Args`] from positional values.
///
/// ```
/// let args = remotefn::args![2, "three", vec![4, 5]];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::new()$(.push($value))+
    };
}

/// A handler wrapped for transparent local or remote execution.
///
/// Owns a private staging area for its whole lifetime. Dropping it removes
/// the staging area; [`close`](RemoteFn::close) does the same but reports
/// failures.
pub struct RemoteFn {
    handler: Handler,
    config: InvocationConfig,
    backend: Box<dyn Backend>,
    staging: StagingArea,
}

impl RemoteFn {
    /// Start wrapping the handler registered as `name`.
    pub fn builder(namespace: Arc<Registry>, name: impl Into<String>) -> RemoteFnBuilder {
        RemoteFnBuilder {
            namespace,
            name: name.into(),
            config: InvocationConfig::default(),
            market: None,
            backend: None,
            options: RemoteOptions::default(),
            observer: None,
            staging_parent: None,
        }
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    /// Which backend calls are routed to.
    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn staging_path(&self) -> &std::path::Path {
        self.staging.path()
    }

    /// Invoke the handler and return its JSON result.
    pub async fn call(&self, args: Args) -> Result<Value> {
        let callable_blob = callable::serialize(&self.handler)?;
        let argument_blobs = args.into_blobs()?;
        let unit = InvocationUnit::new(self.handler.name(), callable_blob, argument_blobs);

        let stage = self.staging.begin_call().await?;
        info!(
            handler = %self.handler.name(),
            call_id = %stage.call_id(),
            backend = self.backend.kind(),
            arg_count = unit.arg_count(),
            "Invoking"
        );

        let result = self.backend.invoke(&unit, &stage).await;
        match &result {
            Ok(_) => debug!(call_id = %stage.call_id(), "Invocation succeeded"),
            Err(e) => warn!(call_id = %stage.call_id(), error = %e, "Invocation failed"),
        }
        result
    }

    /// Invoke the handler and deserialize its result into `R`.
    pub async fn call_as<R: DeserializeOwned>(&self, args: Args) -> Result<R> {
        let value = self.call(args).await?;
        serde_json::from_value(value).map_err(|e| InvocationError::Deserialization(e.to_string()))
    }

    /// Tear down the staging area.
    pub fn close(self) -> Result<()> {
        self.staging.close()
    }
}

/// Builder for [`RemoteFn`].
pub struct RemoteFnBuilder {
    namespace: Arc<Registry>,
    name: String,
    config: InvocationConfig,
    market: Option<Arc<dyn Marketplace>>,
    backend: Option<Box<dyn Backend>>,
    options: RemoteOptions,
    observer: Option<EventSink>,
    staging_parent: Option<PathBuf>,
}

impl RemoteFnBuilder {
    /// Set the invocation configuration.
    pub fn config(mut self, config: InvocationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the marketplace engine used when not running locally.
    pub fn marketplace(mut self, market: Arc<dyn Marketplace>) -> Self {
        self.market = Some(market);
        self
    }

    /// Route calls to a custom backend, ignoring `run_local`.
    pub fn backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set engine-facing options for the remote path.
    pub fn remote_options(mut self, options: RemoteOptions) -> Self {
        self.options = options;
        self
    }

    /// Receive the engine's progress events.
    pub fn observer(mut self, observer: EventSink) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Create the staging area under `parent` instead of the temp dir.
    pub fn staging_in(mut self, parent: impl Into<PathBuf>) -> Self {
        self.staging_parent = Some(parent.into());
        self
    }

    /// Resolve the handler, pick the backend and acquire the staging area.
    pub fn build(self) -> Result<RemoteFn> {
        let handler = self.namespace.get(&self.name).cloned().ok_or_else(|| {
            InvocationError::Registration(format!("no handler named '{}'", self.name))
        })?;

        let backend: Box<dyn Backend> = if let Some(backend) = self.backend {
            backend
        } else if self.config.run_local {
            Box::new(LocalBackend::new(self.namespace.clone()))
        } else {
            let market = self.market.ok_or_else(|| {
                InvocationError::Session("remote execution needs a marketplace engine".to_string())
            })?;
            let mut remote =
                RemoteBackend::new(market, self.config.clone()).with_options(self.options);
            if let Some(observer) = self.observer {
                remote = remote.with_observer(observer);
            }
            Box::new(remote)
        };

        let staging = match &self.staging_parent {
            Some(parent) => StagingArea::new_in(parent, handler.name())?,
            None => StagingArea::new(handler.name())?,
        };

        debug!(
            handler = %handler.name(),
            backend = backend.kind(),
            staging = %staging.path().display(),
            "Wrapped handler"
        );

        Ok(RemoteFn {
            handler,
            config: self.config,
            backend,
            staging,
        })
    }
}
