//! Execution on the compute marketplace.
//!
//! One call becomes one [`Task`]. The task is staged locally, pushed into a
//! single-slot queue, and consumed by a worker loop that ships the inputs,
//! runs the entry point, downloads the output and commits the batch. The
//! whole session runs under one deadline; nothing is retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remotefn_core::{
    Command, EngineEvent, EngineEventKind, ImageSpec, InputArtifact, InvocationConfig,
    OutputArtifact, Task, TaskStatus,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::Backend;
use crate::codec;
use crate::error::{InvocationError, Result};
use crate::market::{EventSink, Marketplace, SessionOptions, WorkerSession};
use crate::runner::{remote_arg_path, REMOTE_FUNC_PATH, REMOTE_OUTPUT_PATH, RUNNER_PROGRAM};
use crate::staging::CallStage;
use crate::unit::InvocationUnit;

/// Engine-facing settings that callers rarely change.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOptions {
    /// Image booted on the worker.
    pub image: ImageSpec,
    /// Ceiling on workers the engine may provision for one session.
    pub max_workers: usize,
    /// Added to the caller's timeout to cover provider startup.
    pub init_overhead: Duration,
    /// Entry point executed on the worker.
    pub program: String,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            image: ImageSpec::default(),
            max_workers: 3,
            init_overhead: Duration::from_secs(3 * 60),
            program: RUNNER_PROGRAM.to_string(),
        }
    }
}

impl RemoteOptions {
    /// Builder method to set the image.
    pub fn with_image(mut self, image: ImageSpec) -> Self {
        self.image = image;
        self
    }

    /// Builder method to set the worker ceiling.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builder method to set the initialization overhead.
    pub fn with_init_overhead(mut self, overhead: Duration) -> Self {
        self.init_overhead = overhead;
        self
    }
}

/// Outcome of one remote dispatch: the task as it ended, and the result.
#[derive(Debug)]
pub struct Dispatch {
    pub task: Task,
    pub result: Result<Value>,
}

/// Runs invocation units on a marketplace engine.
#[derive(Clone)]
pub struct RemoteBackend {
    market: Arc<dyn Marketplace>,
    config: InvocationConfig,
    options: RemoteOptions,
    observer: Option<EventSink>,
}

impl RemoteBackend {
    pub fn new(market: Arc<dyn Marketplace>, config: InvocationConfig) -> Self {
        Self {
            market,
            config,
            options: RemoteOptions::default(),
            observer: None,
        }
    }

    /// Builder method to set engine-facing options.
    pub fn with_options(mut self, options: RemoteOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder method to forward engine events to `observer`.
    pub fn with_observer(mut self, observer: EventSink) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Whole-session deadline: initialization overhead plus caller timeout.
    pub fn total_timeout(&self) -> Duration {
        self.options.init_overhead + self.config.timeout
    }

    /// Run one unit and report the task's final state alongside the result.
    pub async fn dispatch(&self, unit: &InvocationUnit, stage: &CallStage) -> Dispatch {
        let task = self.build_task(unit, stage);
        let task_id = task.id.clone();
        let (tracker, snapshot) = watch::channel(task.clone());
        let events = self.spawn_progress_logger();

        info!(
            task_id = %task_id,
            call_id = %stage.call_id(),
            handler = %unit.handler(),
            subnet = %self.config.subnet,
            budget = self.config.budget,
            "Dispatching task"
        );

        let outcome = match self.check_limits() {
            Err(e) => Err(e),
            Ok(total) => {
                self.run_session(task, unit, stage, &tracker, events.clone(), total)
                    .await
            }
        };

        let mut task = snapshot.borrow().clone();
        let result = match outcome {
            Ok(output) => read_output(&output).await,
            Err(e) => {
                task.fail(e.to_string());
                let _ = events.send(EngineEvent::task(
                    task_id.clone(),
                    EngineEventKind::TaskFailed {
                        error: e.to_string(),
                    },
                ));
                warn!(task_id = %task_id, error = %e, "Task failed");
                Err(e)
            }
        };
        Dispatch { task, result }
    }

    fn check_limits(&self) -> Result<Duration> {
        self.config
            .validate_budget()
            .map_err(|e| InvocationError::Session(e.to_string()))?;
        if self.config.timeout.is_zero() {
            return Err(InvocationError::Session(
                "timeout elapsed before the session could start".to_string(),
            ));
        }
        Ok(self.total_timeout())
    }

    fn build_task(&self, unit: &InvocationUnit, stage: &CallStage) -> Task {
        let mut inputs = vec![InputArtifact::new(
            stage.callable_path(unit.handler()),
            REMOTE_FUNC_PATH,
        )];
        let mut command = Command::new(&self.options.program).arg(REMOTE_FUNC_PATH);
        for i in 0..unit.arg_count() {
            let remote = remote_arg_path(i);
            inputs.push(InputArtifact::new(stage.arg_path(i), remote.clone()));
            command = command.arg(remote);
        }
        Task::new(
            stage.call_id().clone(),
            unit.handler(),
            inputs,
            command,
            OutputArtifact {
                remote: REMOTE_OUTPUT_PATH.to_string(),
                local: stage.output_path(),
            },
        )
    }

    /// Log engine events, forwarding them to the observer if there is one.
    fn spawn_progress_logger(&self) -> EventSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineEvent>();
        let observer = self.observer.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                info!(task_id = ?event.task_id, progress = ?event.kind, "Engine progress");
                if let Some(observer) = &observer {
                    observer.send(event).ok();
                }
            }
        });
        tx
    }

    /// Drive one task through a session that ends by `total`.
    ///
    /// An opened session is always closed, also when the deadline expires
    /// while the worker loop is still running.
    async fn run_session(
        &self,
        mut task: Task,
        unit: &InvocationUnit,
        stage: &CallStage,
        tracker: &watch::Sender<Task>,
        events: EventSink,
        total: Duration,
    ) -> Result<PathBuf> {
        let deadline = Instant::now() + total;
        let timed_out = || InvocationError::Session(format!("session timed out after {:?}", total));

        let opening = self.open_session(&mut task, unit, stage, tracker, &events);
        let mut session = timeout_at(deadline, opening)
            .await
            .map_err(|_| timed_out())??;

        let outcome = match self.submit(task, tracker, &events).await {
            Ok(tasks) => {
                let work = worker_loop(session.as_mut(), tasks, tracker, &events);
                match timeout_at(deadline, work).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(timed_out()),
                }
            }
            Err(e) => Err(e),
        };

        match session.close().await {
            Ok(spent) => info!(spent, "Session finished"),
            Err(e) => warn!(error = %e, "Failed to close session"),
        }
        outcome
    }

    async fn open_session(
        &self,
        task: &mut Task,
        unit: &InvocationUnit,
        stage: &CallStage,
        tracker: &watch::Sender<Task>,
        events: &EventSink,
    ) -> Result<Box<dyn WorkerSession>> {
        stage.stage(unit).await?;
        advance(task, TaskStatus::Staged, tracker)?;

        let package = self.market.resolve_package(&self.options.image).await?;
        let _ = events.send(EngineEvent::session(EngineEventKind::PackageResolved {
            image_hash: package.image_hash.clone(),
        }));

        let options = SessionOptions {
            budget: self.config.budget,
            timeout: self.total_timeout(),
            subnet: self.config.subnet.clone(),
            max_workers: self.options.max_workers,
        };
        Ok(self.market.open_session(package, options, events.clone()).await?)
    }

    /// Queue the task for the worker loop.
    async fn submit(
        &self,
        mut task: Task,
        tracker: &watch::Sender<Task>,
        events: &EventSink,
    ) -> Result<ReceiverStream<Task>> {
        let (queue, tasks) = mpsc::channel::<Task>(1);
        advance(&mut task, TaskStatus::Submitted, tracker)?;
        let _ = events.send(EngineEvent::task(task.id.clone(), EngineEventKind::TaskSubmitted));
        queue
            .send(task)
            .await
            .map_err(|_| InvocationError::Session("task queue closed".to_string()))?;
        Ok(ReceiverStream::new(tasks))
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn invoke(&self, unit: &InvocationUnit, stage: &CallStage) -> Result<Value> {
        self.dispatch(unit, stage).await.result
    }
}

/// Consume the task queue on one worker until it is drained.
async fn worker_loop(
    session: &mut dyn WorkerSession,
    mut tasks: ReceiverStream<Task>,
    tracker: &watch::Sender<Task>,
    events: &EventSink,
) -> Result<PathBuf> {
    let mut ctx = session.acquire_worker().await?;
    let mut accepted = None;

    while let Some(mut task) = tasks.next().await {
        advance(&mut task, TaskStatus::Running, tracker)?;
        debug!(task_id = %task.id, worker = %ctx.worker_id(), "Running task");

        for input in &task.inputs {
            ctx.send_file(&input.local, &input.remote);
        }
        ctx.run(&task.command.program, &task.command.args);
        ctx.download_file(&task.output.remote, &task.output.local);
        ctx.commit().await?;

        task.accept(task.output.local.clone())?;
        tracker.send_replace(task.clone());
        let _ = events.send(EngineEvent::task(task.id.clone(), EngineEventKind::TaskAccepted));
        accepted = task.result;
    }

    debug!(worker = %ctx.worker_id(), "Worker done");
    accepted.ok_or_else(|| {
        InvocationError::Session("worker finished without accepting a task".to_string())
    })
}

fn advance(task: &mut Task, next: TaskStatus, tracker: &watch::Sender<Task>) -> Result<()> {
    task.transition(next)?;
    tracker.send_replace(task.clone());
    Ok(())
}

async fn read_output(path: &Path) -> Result<Value> {
    let bytes = tokio::fs::read(path).await?;
    codec::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{self, Handler, Registry};
    use crate::market::{FaultPoint, LoopbackMarketplace, LoopbackOptions};
    use crate::staging::StagingArea;
    use serde_json::json;

    fn namespace() -> Arc<Registry> {
        Arc::new(
            Registry::new()
                .with_handler(Handler::typed("add", 2, |(a, b): (i64, i64)| a + b))
                .unwrap(),
        )
    }

    fn unit(a: i64, b: i64) -> InvocationUnit {
        let handler = namespace().get("add").unwrap().clone();
        InvocationUnit::new(
            "add",
            callable::serialize(&handler).unwrap(),
            vec![codec::encode(&a).unwrap(), codec::encode(&b).unwrap()],
        )
    }

    fn backend(options: LoopbackOptions, config: InvocationConfig) -> RemoteBackend {
        let market = LoopbackMarketplace::new(namespace()).with_options(options);
        RemoteBackend::new(Arc::new(market), config)
            .with_options(RemoteOptions::default().with_init_overhead(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_task_reaches_accepted() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let remote = backend(LoopbackOptions::default(), InvocationConfig::default());

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;

        assert_eq!(dispatch.result.unwrap(), json!(5));
        assert_eq!(
            dispatch.task.history,
            vec![
                TaskStatus::Created,
                TaskStatus::Staged,
                TaskStatus::Submitted,
                TaskStatus::Running,
                TaskStatus::Accepted,
            ]
        );
        assert_eq!(dispatch.task.result, Some(stage.output_path()));
    }

    #[tokio::test]
    async fn test_task_layout() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let remote = backend(LoopbackOptions::default(), InvocationConfig::default());

        let task = remote.build_task(&unit(1, 1), &stage);
        let remotes: Vec<&str> = task.inputs.iter().map(|i| i.remote.as_str()).collect();
        assert_eq!(
            remotes,
            vec!["/golem/input/func", "/golem/input/arg0", "/golem/input/arg1"]
        );
        assert_eq!(task.command.program, RUNNER_PROGRAM);
        assert_eq!(task.command.args, remotes);
        assert_eq!(task.output.remote, "/golem/output/out");
        assert_eq!(task.inputs[0].local, stage.dir().join("add"));
    }

    #[tokio::test]
    async fn test_failing_steps_end_in_failed() {
        let cases = [
            (FaultPoint::Init, "Session"),
            (FaultPoint::Send, "Transfer"),
            (FaultPoint::Run, "Commit"),
            (FaultPoint::Download, "Transfer"),
            (FaultPoint::Commit, "Commit"),
        ];
        for (fault, expected) in cases {
            let area = StagingArea::new("remote").unwrap();
            let stage = area.begin_call().await.unwrap();
            let remote = backend(
                LoopbackOptions::default().with_fault(fault),
                InvocationConfig::default(),
            );

            let dispatch = remote.dispatch(&unit(2, 3), &stage).await;

            let err = dispatch.result.unwrap_err();
            assert!(
                format!("{:?}", err).starts_with(expected),
                "{:?}: got {:?}",
                fault,
                err
            );
            assert_eq!(dispatch.task.status, TaskStatus::Failed);
            assert!(!dispatch.task.history.contains(&TaskStatus::Accepted));
            assert!(dispatch.task.result.is_none());
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_before_staging() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let market = LoopbackMarketplace::new(namespace());
        let remote = RemoteBackend::new(
            Arc::new(market),
            InvocationConfig::default().with_timeout(Duration::ZERO),
        );
        assert!(!remote.total_timeout().is_zero());

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;

        assert!(matches!(dispatch.result, Err(InvocationError::Session(_))));
        assert_eq!(
            dispatch.task.history,
            vec![TaskStatus::Created, TaskStatus::Failed]
        );
        assert!(!stage.callable_path("add").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let remote = backend(
            LoopbackOptions::default().with_latency(Duration::from_secs(5)),
            InvocationConfig::default().with_timeout(Duration::from_millis(50)),
        );

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;

        let err = dispatch.result.unwrap_err();
        assert!(matches!(err, InvocationError::Session(_)));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(dispatch.task.status, TaskStatus::Failed);
        assert!(dispatch.task.history.contains(&TaskStatus::Running));
        assert!(!stage.output_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_closed_after_timeout() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote = backend(
            LoopbackOptions::default().with_latency(Duration::from_secs(2)),
            InvocationConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .with_observer(tx);

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;
        assert!(dispatch.result.is_err());
        drop(remote);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert!(kinds
            .iter()
            .any(|k| matches!(k, EngineEventKind::SessionFinished { .. })));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, EngineEventKind::TaskFailed { .. })));
        assert!(!kinds.contains(&EngineEventKind::TaskAccepted));
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let remote = backend(
            LoopbackOptions::default().with_cost_per_commit(2.0),
            InvocationConfig::default().with_budget(1.0),
        );

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;

        let err = dispatch.result.unwrap_err();
        assert!(matches!(err, InvocationError::Session(_)));
        assert!(err.to_string().contains("budget exhausted"));
    }

    #[tokio::test]
    async fn test_invalid_budget_rejected() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let remote = backend(
            LoopbackOptions::default(),
            InvocationConfig::default().with_budget(0.0),
        );

        let dispatch = remote.dispatch(&unit(2, 3), &stage).await;
        assert!(matches!(dispatch.result, Err(InvocationError::Session(_))));
        assert_eq!(dispatch.task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_observer_sees_progress() {
        let area = StagingArea::new("remote").unwrap();
        let stage = area.begin_call().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote =
            backend(LoopbackOptions::default(), InvocationConfig::default()).with_observer(tx);

        remote.dispatch(&unit(2, 3), &stage).await.result.unwrap();
        drop(remote);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&EngineEventKind::TaskSubmitted));
        assert!(kinds.contains(&EngineEventKind::TaskAccepted));
        assert!(matches!(
            kinds.last(),
            Some(EngineEventKind::SessionFinished { .. })
        ));
    }
}
