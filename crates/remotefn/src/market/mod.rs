//! Interface to the compute marketplace engine.
//!
//! The engine finds a provider, boots the execution image, and bills for the
//! work. This crate only needs the narrow surface below: resolve a package,
//! open a session bounded by budget and time, get a worker, and push batches
//! of transfers and commands to it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use remotefn_core::{EngineEvent, ImageSpec};
use thiserror::Error;
use tokio::sync::mpsc;

mod loopback;

pub use loopback::{FaultPoint, LoopbackMarketplace, LoopbackOptions};

/// Errors reported by a marketplace engine.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Engine or session could not be initialized.
    #[error("engine initialization failed: {0}")]
    Init(String),

    /// The session would spend more than it was allowed to.
    #[error("budget exhausted: spent {spent:.4} of {budget:.4}")]
    BudgetExhausted { spent: f64, budget: f64 },

    /// The session is no longer usable.
    #[error("session closed")]
    Closed,

    /// Moving a file to or from the worker failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The command on the worker failed.
    #[error("remote command failed: {0}")]
    Execution(String),

    /// The batch could not be committed.
    #[error("commit failed: {0}")]
    Commit(String),
}

/// Sink for progress events.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

/// An execution package resolved from an [`ImageSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub image_hash: String,
    /// Engine-specific locator of the image.
    pub url: String,
    pub min_mem_gib: f64,
    pub min_storage_gib: f64,
}

/// Limits a session is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub budget: f64,
    /// Whole-session wall clock, initialization overhead included.
    pub timeout: Duration,
    pub subnet: String,
    /// Ceiling on concurrently provisioned workers.
    pub max_workers: usize,
}

/// One step of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    SendFile { local: PathBuf, remote: String },
    Run { program: String, args: Vec<String> },
    DownloadFile { remote: String, local: PathBuf },
}

/// A marketplace engine.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Find the execution package for an image.
    async fn resolve_package(&self, image: &ImageSpec) -> Result<Package, MarketError>;

    /// Open a session. Progress is reported on `events`.
    async fn open_session(
        &self,
        package: Package,
        options: SessionOptions,
        events: EventSink,
    ) -> Result<Box<dyn WorkerSession>, MarketError>;
}

/// A running session on the marketplace.
#[async_trait]
pub trait WorkerSession: Send {
    /// Provision a worker and return its work context.
    async fn acquire_worker(&mut self) -> Result<Box<dyn WorkContext>, MarketError>;

    /// Amount spent so far.
    fn spent(&self) -> f64;

    /// Release all workers and settle. Returns the total spent.
    async fn close(self: Box<Self>) -> Result<f64, MarketError>;
}

/// Work context on a single provisioned worker.
///
/// Steps are queued with the helper methods and only take effect when
/// [`commit`](WorkContext::commit) runs them as one unit.
#[async_trait]
pub trait WorkContext: Send {
    /// Identifier of the provider's worker.
    fn worker_id(&self) -> &str;

    /// Queue a step for the next commit.
    fn push(&mut self, step: Step);

    /// Run all queued steps in order; the first failure aborts the batch.
    async fn commit(&mut self) -> Result<(), MarketError>;

    fn send_file(&mut self, local: &Path, remote: &str) {
        self.push(Step::SendFile {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
    }

    fn run(&mut self, program: &str, args: &[String]) {
        self.push(Step::Run {
            program: program.to_string(),
            args: args.to_vec(),
        });
    }

    fn download_file(&mut self, remote: &str, local: &Path) {
        self.push(Step::DownloadFile {
            remote: remote.to_string(),
            local: local.to_path_buf(),
        });
    }
}
