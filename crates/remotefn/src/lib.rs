//! Remote function invocation over a compute marketplace.
//!
//! Wrap a registered handler in a [`RemoteFn`] and call it like any async
//! function. Depending on its [`InvocationConfig`] the call runs in-process or
//! as a single task on a worker provisioned by a [`Marketplace`] engine; the
//! caller gets the same JSON result either way.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use remotefn::{args, Handler, InvocationConfig, LoopbackMarketplace, Registry, RemoteFn};
//!
//! async fn run() -> Result<(), remotefn::InvocationError> {
//!     let registry = Arc::new(
//!         Registry::new().with_handler(Handler::typed("add", 2, |(a, b): (i64, i64)| a + b))?,
//!     );
//!
//!     let add = RemoteFn::builder(registry.clone(), "add")
//!         .config(InvocationConfig::default().with_budget(10.0))
//!         .marketplace(Arc::new(LoopbackMarketplace::new(registry)))
//!         .build()?;
//!
//!     let sum: i64 = add.call_as(args![2, 3]).await?;
//!     assert_eq!(sum, 5);
//!     add.close()
//! }
//! ```

pub mod backend;
pub mod builtins;
pub mod callable;
pub mod codec;
mod dispatcher;
mod error;
pub mod market;
pub mod runner;
pub mod staging;
mod unit;

// Re-export main types
pub use backend::{Backend, Dispatch, LocalBackend, RemoteBackend, RemoteOptions};
pub use callable::{CallableDescriptor, Handler, Registry, ResolvedCallable};
pub use dispatcher::{Args, RemoteFn, RemoteFnBuilder};
pub use error::{InvocationError, Result};
pub use market::{
    FaultPoint, LoopbackMarketplace, LoopbackOptions, MarketError, Marketplace, WorkContext,
    WorkerSession,
};
pub use remotefn_core::{
    EngineEvent, EngineEventKind, ImageSpec, InvocationConfig, Task, TaskId, TaskStatus,
};
pub use staging::{CallStage, StagingArea};
pub use unit::InvocationUnit;
