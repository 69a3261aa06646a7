//! In-process marketplace engine.
//!
//! Emulates a provider on the local machine: every worker gets a private
//! directory standing in for its filesystem, and the entry point program is
//! executed in-process against a worker-side registry. Commits are billed
//! against the session budget, and faults can be injected at each step.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remotefn_core::{EngineEvent, EngineEventKind, ImageSpec};
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    EventSink, MarketError, Marketplace, Package, SessionOptions, Step, WorkContext, WorkerSession,
};
use crate::callable::Registry;
use crate::runner::{self, REMOTE_OUTPUT_PATH, RUNNER_PROGRAM};

/// Step at which the loopback engine should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Opening the session.
    Init,
    /// Sending a file to the worker.
    Send,
    /// Running the entry point.
    Run,
    /// Downloading a file from the worker.
    Download,
    /// Committing after all steps succeeded.
    Commit,
}

/// Loopback engine configuration.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Amount billed per committed batch.
    pub cost_per_commit: f64,
    /// Simulated provider latency, applied once per commit.
    pub latency: Duration,
    /// Injected failure, if any.
    pub fault: Option<FaultPoint>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            cost_per_commit: 0.01,
            latency: Duration::ZERO,
            fault: None,
        }
    }
}

impl LoopbackOptions {
    /// Builder method to set the per-commit cost.
    pub fn with_cost_per_commit(mut self, cost: f64) -> Self {
        self.cost_per_commit = cost;
        self
    }

    /// Builder method to set the simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Builder method to inject a failure.
    pub fn with_fault(mut self, fault: FaultPoint) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// A marketplace engine that runs workers in this process.
#[derive(Debug, Clone)]
pub struct LoopbackMarketplace {
    namespace: Arc<Registry>,
    options: LoopbackOptions,
}

impl LoopbackMarketplace {
    /// Create an engine whose workers resolve callables in `namespace`.
    pub fn new(namespace: Arc<Registry>) -> Self {
        Self {
            namespace,
            options: LoopbackOptions::default(),
        }
    }

    /// Builder method to set engine options.
    pub fn with_options(mut self, options: LoopbackOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Marketplace for LoopbackMarketplace {
    async fn resolve_package(&self, image: &ImageSpec) -> Result<Package, MarketError> {
        if image.image_hash.is_empty() {
            return Err(MarketError::Init("image hash is empty".to_string()));
        }
        Ok(Package {
            image_hash: image.image_hash.clone(),
            url: format!("loopback://{}", image.image_hash),
            min_mem_gib: image.min_mem_gib,
            min_storage_gib: image.min_storage_gib,
        })
    }

    async fn open_session(
        &self,
        package: Package,
        options: SessionOptions,
        events: EventSink,
    ) -> Result<Box<dyn WorkerSession>, MarketError> {
        if self.options.fault == Some(FaultPoint::Init) {
            return Err(MarketError::Init("injected fault".to_string()));
        }
        if options.max_workers == 0 {
            return Err(MarketError::Init("worker ceiling must be at least 1".to_string()));
        }

        info!(
            image = %package.image_hash,
            subnet = %options.subnet,
            budget = options.budget,
            "Opening loopback session"
        );
        let _ = events.send(EngineEvent::session(EngineEventKind::SessionStarted {
            subnet: options.subnet.clone(),
            budget: options.budget,
        }));

        Ok(Box::new(LoopbackSession {
            namespace: self.namespace.clone(),
            engine: self.options.clone(),
            options,
            events,
            workers: 0,
            ledger: Arc::new(std::sync::Mutex::new(0.0)),
        }))
    }
}

/// Shared spending ledger of a session.
type Ledger = Arc<std::sync::Mutex<f64>>;

struct LoopbackSession {
    namespace: Arc<Registry>,
    engine: LoopbackOptions,
    options: SessionOptions,
    events: EventSink,
    workers: usize,
    ledger: Ledger,
}

#[async_trait]
impl WorkerSession for LoopbackSession {
    async fn acquire_worker(&mut self) -> Result<Box<dyn WorkContext>, MarketError> {
        if self.workers >= self.options.max_workers {
            return Err(MarketError::Init(format!(
                "worker ceiling of {} reached",
                self.options.max_workers
            )));
        }
        let root = tempfile::Builder::new()
            .prefix("remotefn-worker-")
            .tempdir()
            .map_err(|e| MarketError::Init(e.to_string()))?;
        let worker_id = format!("loopback-{}", Uuid::new_v4().simple());
        self.workers += 1;

        let _ = self.events.send(EngineEvent::session(EngineEventKind::WorkerAcquired {
            worker: worker_id.clone(),
        }));

        Ok(Box::new(LoopbackWorker {
            worker_id,
            root,
            namespace: self.namespace.clone(),
            engine: self.engine.clone(),
            budget: self.options.budget,
            ledger: self.ledger.clone(),
            events: self.events.clone(),
            pending: Vec::new(),
        }))
    }

    fn spent(&self) -> f64 {
        *self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn close(self: Box<Self>) -> Result<f64, MarketError> {
        let spent = self.spent();
        let _ = self
            .events
            .send(EngineEvent::session(EngineEventKind::SessionFinished { spent }));
        debug!(spent, "Closed loopback session");
        Ok(spent)
    }
}

struct LoopbackWorker {
    worker_id: String,
    root: TempDir,
    namespace: Arc<Registry>,
    engine: LoopbackOptions,
    budget: f64,
    ledger: Ledger,
    events: EventSink,
    pending: Vec<Step>,
}

impl LoopbackWorker {
    /// Map a remote absolute path into the worker's private root.
    fn resolve(&self, remote: &str) -> Result<PathBuf, MarketError> {
        let path = Path::new(remote);
        if !path.is_absolute() {
            return Err(MarketError::Transfer(format!(
                "remote path must be absolute: {}",
                remote
            )));
        }
        let mut local = self.root.path().to_path_buf();
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::Normal(part) => local.push(part),
                _ => {
                    return Err(MarketError::Transfer(format!(
                        "remote path escapes the worker root: {}",
                        remote
                    )))
                }
            }
        }
        Ok(local)
    }

    fn charge(&self) -> Result<f64, MarketError> {
        let mut spent = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let next = *spent + self.engine.cost_per_commit;
        if next > self.budget {
            return Err(MarketError::BudgetExhausted {
                spent: next,
                budget: self.budget,
            });
        }
        *spent = next;
        Ok(self.engine.cost_per_commit)
    }

    async fn apply(&self, step: &Step) -> Result<(), MarketError> {
        match step {
            Step::SendFile { local, remote } => {
                if self.engine.fault == Some(FaultPoint::Send) {
                    return Err(MarketError::Transfer("injected fault".to_string()));
                }
                let target = self.resolve(remote)?;
                copy(local, &target).await
            }
            Step::Run { program, args } => {
                if self.engine.fault == Some(FaultPoint::Run) {
                    return Err(MarketError::Execution("injected fault".to_string()));
                }
                if program != RUNNER_PROGRAM {
                    return Err(MarketError::Execution(format!(
                        "{}: no such program",
                        program
                    )));
                }
                let (func, rest) = args.split_first().ok_or_else(|| {
                    MarketError::Execution("entry point needs a callable path".to_string())
                })?;
                let func = self.resolve(func)?;
                let args = rest
                    .iter()
                    .map(|a| self.resolve(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let output = self.resolve(REMOTE_OUTPUT_PATH)?;
                runner::execute(self.namespace.clone(), &func, &args, &output)
                    .await
                    .map(|_| ())
                    .map_err(|e| MarketError::Execution(e.to_string()))
            }
            Step::DownloadFile { remote, local } => {
                if self.engine.fault == Some(FaultPoint::Download) {
                    return Err(MarketError::Transfer("injected fault".to_string()));
                }
                let source = self.resolve(remote)?;
                copy(&source, local).await
            }
        }
    }
}

async fn copy(from: &Path, to: &Path) -> Result<(), MarketError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MarketError::Transfer(e.to_string()))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| MarketError::Transfer(format!("{}: {}", from.display(), e)))
}

#[async_trait]
impl WorkContext for LoopbackWorker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn push(&mut self, step: Step) {
        self.pending.push(step);
    }

    async fn commit(&mut self) -> Result<(), MarketError> {
        let steps = std::mem::take(&mut self.pending);
        if !self.engine.latency.is_zero() {
            tokio::time::sleep(self.engine.latency).await;
        }
        let cost = self.charge()?;

        for step in &steps {
            debug!(worker = %self.worker_id, ?step, "Applying step");
            self.apply(step).await?;
        }
        if self.engine.fault == Some(FaultPoint::Commit) {
            return Err(MarketError::Commit("injected fault".to_string()));
        }

        let _ = self
            .events
            .send(EngineEvent::session(EngineEventKind::BatchCommitted { cost }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{self, Handler};
    use crate::codec;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn namespace() -> Arc<Registry> {
        Arc::new(
            Registry::new()
                .with_handler(Handler::typed("double", 1, |(x,): (i64,)| x * 2))
                .unwrap(),
        )
    }

    fn session_options(budget: f64) -> SessionOptions {
        SessionOptions {
            budget,
            timeout: Duration::from_secs(60),
            subnet: "devnet-alpha.2".to_string(),
            max_workers: 1,
        }
    }

    async fn open(
        market: &LoopbackMarketplace,
        budget: f64,
    ) -> (Box<dyn WorkerSession>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let package = market.resolve_package(&ImageSpec::default()).await.unwrap();
        let session = market
            .open_session(package, session_options(budget), tx)
            .await
            .unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_batch_runs_entry_point() {
        let market = LoopbackMarketplace::new(namespace());
        let (mut session, mut events) = open(&market, 1.0).await;
        let mut ctx = session.acquire_worker().await.unwrap();

        let local = tempfile::tempdir().unwrap();
        let func = local.path().join("double");
        let arg = local.path().join("arg0");
        let out = local.path().join("out");
        let handler = namespace().get("double").unwrap().clone();
        tokio::fs::write(&func, callable::serialize(&handler).unwrap())
            .await
            .unwrap();
        tokio::fs::write(&arg, codec::encode(&21).unwrap()).await.unwrap();

        ctx.send_file(&func, "/golem/input/func");
        ctx.send_file(&arg, "/golem/input/arg0");
        ctx.run(
            RUNNER_PROGRAM,
            &["/golem/input/func".to_string(), "/golem/input/arg0".to_string()],
        );
        ctx.download_file(REMOTE_OUTPUT_PATH, &out);
        ctx.commit().await.unwrap();

        let bytes = tokio::fs::read(&out).await.unwrap();
        assert_eq!(codec::decode(&bytes).unwrap(), json!(42));
        assert!((session.spent() - 0.01).abs() < 1e-9);

        let spent = session.close().await.unwrap();
        assert!(spent > 0.0);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        assert!(matches!(kinds[0], EngineEventKind::SessionStarted { .. }));
        assert!(matches!(kinds[1], EngineEventKind::WorkerAcquired { .. }));
        assert!(matches!(kinds[2], EngineEventKind::BatchCommitted { .. }));
        assert!(matches!(kinds[3], EngineEventKind::SessionFinished { .. }));
    }

    #[tokio::test]
    async fn test_budget_exhausted_before_running() {
        let market = LoopbackMarketplace::new(namespace())
            .with_options(LoopbackOptions::default().with_cost_per_commit(5.0));
        let (mut session, _events) = open(&market, 1.0).await;
        let mut ctx = session.acquire_worker().await.unwrap();
        ctx.run(RUNNER_PROGRAM, &["/golem/input/func".to_string()]);

        let err = ctx.commit().await.unwrap_err();
        assert!(matches!(err, MarketError::BudgetExhausted { .. }));
        assert_eq!(session.spent(), 0.0);
    }

    #[tokio::test]
    async fn test_worker_ceiling() {
        let market = LoopbackMarketplace::new(namespace());
        let (mut session, _events) = open(&market, 1.0).await;
        session.acquire_worker().await.unwrap();
        let err = session.acquire_worker().await.err().unwrap();
        assert!(matches!(err, MarketError::Init(_)));
    }

    #[tokio::test]
    async fn test_remote_paths_stay_inside_root() {
        let market = LoopbackMarketplace::new(namespace());
        let (mut session, _events) = open(&market, 1.0).await;
        let mut ctx = session.acquire_worker().await.unwrap();
        ctx.download_file("/golem/../../etc/passwd", Path::new("/tmp/never"));
        let err = ctx.commit().await.unwrap_err();
        assert!(matches!(err, MarketError::Transfer(_)));
    }

    #[tokio::test]
    async fn test_unknown_program() {
        let market = LoopbackMarketplace::new(namespace());
        let (mut session, _events) = open(&market, 1.0).await;
        let mut ctx = session.acquire_worker().await.unwrap();
        ctx.run("/usr/bin/python", &[]);
        let err = ctx.commit().await.unwrap_err();
        assert!(err.to_string().contains("no such program"));
    }

    #[tokio::test]
    async fn test_injected_init_fault() {
        let market = LoopbackMarketplace::new(namespace())
            .with_options(LoopbackOptions::default().with_fault(FaultPoint::Init));
        let (tx, _rx) = mpsc::unbounded_channel();
        let package = market.resolve_package(&ImageSpec::default()).await.unwrap();
        let err = market
            .open_session(package, session_options(1.0), tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MarketError::Init(_)));
    }
}
