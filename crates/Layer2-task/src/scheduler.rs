//! Scheduler - bounded worker pool with a global FIFO waiting list
//!
//! Owns the concurrency invariant: at most `limit` tasks are `Running`. All
//! admission, promotion and cancellation happen under one lock. Waiting tasks
//! are plain ids in a queue; only running tasks own a tokio task.
//!
//! Lock order: scheduler state, then registry. Nothing awaits while holding it.

use crate::event::{EventBus, TaskEvent};
use crate::executor::{Executor, RunOutcome, TaskOutput};
use crate::gate::PermissionGate;
use crate::log::LogSink;
use crate::registry::{TaskRegistry, TransitionFields};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskSpec};
use deskrun_foundation::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Initial concurrency limit (at least 1)
    pub max_concurrent: usize,

    /// Require `cwd` to be an existing absolute directory at submission.
    /// Without it a bad `cwd` surfaces as a spawn failure.
    pub validate_cwd: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: deskrun_foundation::DEFAULT_MAX_CONCURRENT,
            validate_cwd: true,
        }
    }
}

/// Snapshot of the scheduler's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub limit: usize,
    pub running: usize,
    pub waiting: usize,
}

struct SchedulerState {
    limit: usize,

    /// Running tasks and their cancellation handles
    running: HashMap<TaskId, CancellationToken>,

    /// Queued tasks in submission order
    waiting: VecDeque<TaskId>,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    registry: Arc<TaskRegistry>,
    sink: Arc<LogSink>,
    events: Arc<EventBus>,
    gate: PermissionGate,
    executor: Arc<dyn Executor>,
    validate_cwd: bool,

    /// Runtime that hosts running tasks, whatever thread promotes them
    runtime: Handle,
}

/// Admission and promotion of tasks
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<TaskRegistry>,
        sink: Arc<LogSink>,
        events: Arc<EventBus>,
        gate: PermissionGate,
        executor: Arc<dyn Executor>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    limit: config.max_concurrent.max(1),
                    running: HashMap::new(),
                    waiting: VecDeque::new(),
                }),
                registry,
                sink,
                events,
                gate,
                executor,
                validate_cwd: config.validate_cwd,
                runtime,
            }),
        }
    }

    /// Validate, pass the permission gate, register and admit or enqueue.
    ///
    /// Returns the task as created (`Queued`). Rejections create nothing.
    pub async fn submit(&self, spec: TaskSpec, confirm_destructive: bool) -> Result<Task> {
        self.validate(&spec)?;
        self.inner
            .gate
            .admit(&spec.thread_id, &spec.command, confirm_destructive)
            .await?;

        let (task, promoted) = {
            let mut state = self.inner.state.lock();
            let task = self.inner.registry.create(spec);
            self.inner.events.publish(TaskEvent::status(&task));
            state.waiting.push_back(task.id);
            let promoted = self.promote(&mut state);
            (task, promoted)
        };

        info!(
            "Submitted task {} on thread {}: {}",
            task.id.short(),
            task.thread_id,
            task.command
        );
        self.launch_all(promoted);
        Ok(task)
    }

    /// Cancel a queued or running task
    ///
    /// Queued tasks end `Cancelled` immediately. Running tasks are signalled and
    /// end `Cancelled` once their process is gone.
    pub fn cancel(&self, id: &TaskId) -> Result<()> {
        let mut state = self.inner.state.lock();
        let task = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Queued => {
                state.waiting.retain(|queued| queued != id);
                let task = self.inner.registry.transition(
                    id,
                    TaskStatus::Cancelled,
                    TransitionFields::default(),
                )?;
                info!("Cancelled queued task {}", id.short());
                self.inner.events.publish(TaskEvent::status(&task));
                Ok(())
            }
            TaskStatus::Running => {
                match state.running.get(id) {
                    Some(token) => {
                        info!("Cancellation requested for running task {}", id.short());
                        token.cancel();
                    }
                    None => error!("Running task {} has no cancellation handle", id),
                }
                Ok(())
            }
            status => Err(Error::not_cancellable(id, status)),
        }
    }

    /// Cancel every queued and running task; returns how many were signalled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = {
            let state = self.inner.state.lock();
            state
                .waiting
                .iter()
                .chain(state.running.keys())
                .copied()
                .collect()
        };
        ids.iter().filter(|id| self.cancel(id).is_ok()).count()
    }

    /// Change the concurrency limit. Raising it promotes waiting tasks at once;
    /// lowering it never stops running ones.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(Error::InvalidInput(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let promoted = {
            let mut state = self.inner.state.lock();
            info!("Concurrency limit {} -> {}", state.limit, limit);
            state.limit = limit;
            self.promote(&mut state)
        };
        self.launch_all(promoted);
        Ok(())
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.state.lock().limit
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            limit: state.limit,
            running: state.running.len(),
            waiting: state.waiting.len(),
        }
    }

    fn validate(&self, spec: &TaskSpec) -> Result<()> {
        if spec.command.trim().is_empty() {
            return Err(Error::InvalidInput("command is empty".to_string()));
        }
        if spec.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidInput("timeout must be positive".to_string()));
        }
        if self.inner.validate_cwd {
            if !spec.cwd.is_absolute() {
                return Err(Error::InvalidCwd(format!(
                    "{} is not an absolute path",
                    spec.cwd.display()
                )));
            }
            if !spec.cwd.is_dir() {
                return Err(Error::InvalidCwd(format!(
                    "{} does not exist or is not a directory",
                    spec.cwd.display()
                )));
            }
        }
        Ok(())
    }

    /// Move waiting tasks to `Running` while slots are free
    fn promote(&self, state: &mut SchedulerState) -> Vec<(Task, CancellationToken)> {
        let mut promoted = Vec::new();

        while state.running.len() < state.limit {
            let Some(id) = state.waiting.pop_front() else {
                break;
            };

            match self
                .inner
                .registry
                .transition(&id, TaskStatus::Running, TransitionFields::default())
            {
                Ok(task) => {
                    let token = CancellationToken::new();
                    state.running.insert(id, token.clone());
                    debug!(
                        "Admitted task {} ({}/{} running)",
                        id.short(),
                        state.running.len(),
                        state.limit
                    );
                    self.inner.events.publish(TaskEvent::status(&task));
                    promoted.push((task, token));
                }
                Err(e) => error!("Failed to admit task {}: {}", id, e),
            }
        }

        promoted
    }

    fn launch_all(&self, promoted: Vec<(Task, CancellationToken)>) {
        for (task, token) in promoted {
            self.launch(task, token);
        }
    }

    /// Run the executor off the caller's path, then record the outcome
    fn launch(&self, task: Task, token: CancellationToken) {
        let scheduler = self.clone();
        let runtime = self.inner.runtime.clone();

        self.inner.runtime.spawn(async move {
            let output = TaskOutput::new(
                &task,
                Arc::clone(&scheduler.inner.sink),
                Arc::clone(&scheduler.inner.events),
            );

            let executor = Arc::clone(&scheduler.inner.executor);
            let run = {
                let task = task.clone();
                let output = output.clone();
                let token = token.clone();
                runtime.spawn(async move { executor.run(&task, output, token).await })
            };

            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Executor for task {} aborted: {}", task.id, e);
                    output.stderr(format!("executor failed: {}", e));
                    RunOutcome::StreamFailed(None)
                }
            };

            scheduler.complete(&task.id, outcome);
        });
    }

    /// Record the terminal state, free the slot and promote the next task
    fn complete(&self, id: &TaskId, outcome: RunOutcome) {
        let promoted = {
            let mut state = self.inner.state.lock();
            let cancel_requested = state
                .running
                .remove(id)
                .map(|token| token.is_cancelled())
                .unwrap_or(false);

            let (status, exit_code) = if cancel_requested {
                (TaskStatus::Cancelled, None)
            } else {
                (outcome.status(), outcome.exit_code())
            };

            match self
                .inner
                .registry
                .transition(id, status, TransitionFields::exit_code(exit_code))
            {
                Ok(task) => {
                    info!(
                        "Task {} {} (exit code: {:?})",
                        id.short(),
                        task.status,
                        task.exit_code
                    );
                    self.inner.events.publish(TaskEvent::status(&task));
                }
                Err(e) => error!("Failed to finish task {}: {}", id, e),
            }

            self.promote(&mut state)
        };

        self.launch_all(promoted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deskrun_foundation::{ExecutionPolicy, InMemoryThreadDirectory, Shell};
    use std::time::Duration;

    /// Executor that waits for cancellation or a fixed delay
    struct FakeExecutor {
        delay: Duration,
        exit_code: i32,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(&self, task: &Task, output: TaskOutput, cancel: CancellationToken) -> RunOutcome {
            output.stdout(format!("ran {}", task.command));
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => RunOutcome::Exited(self.exit_code),
                _ = cancel.cancelled() => RunOutcome::Cancelled,
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn scheduler(limit: usize, delay: Duration) -> (Scheduler, Arc<TaskRegistry>, Arc<LogSink>) {
        let threads = InMemoryThreadDirectory::new().with_thread("t1", ExecutionPolicy::Normal);
        let registry = Arc::new(TaskRegistry::new(Shell::default()));
        let sink = Arc::new(LogSink::new());
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: limit,
                validate_cwd: true,
            },
            Arc::clone(&registry),
            Arc::clone(&sink),
            Arc::new(EventBus::new(64)),
            PermissionGate::new(Arc::new(threads)),
            Arc::new(FakeExecutor { delay, exit_code: 0 }),
            Handle::current(),
        );
        (scheduler, registry, sink)
    }

    fn spec(command: &str) -> TaskSpec {
        TaskSpec::new("t1", command, std::env::temp_dir())
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_limit_respected_and_fifo_promotion() {
        let (scheduler, registry, _) = scheduler(1, Duration::from_millis(50));

        let a = scheduler.submit(spec("a"), false).await.unwrap();
        let b = scheduler.submit(spec("b"), false).await.unwrap();
        assert_eq!(a.status, TaskStatus::Queued);

        assert_eq!(registry.get(&a.id).unwrap().status, TaskStatus::Running);
        assert_eq!(registry.get(&b.id).unwrap().status, TaskStatus::Queued);
        assert_eq!(scheduler.stats(), SchedulerStats { limit: 1, running: 1, waiting: 1 });

        wait_until(|| registry.get(&b.id).unwrap().is_terminal()).await;
        let a = registry.get(&a.id).unwrap();
        let b = registry.get(&b.id).unwrap();
        assert_eq!(a.status, TaskStatus::Succeeded);
        assert!(a.finished_at.unwrap() <= b.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_queued_never_runs() {
        let (scheduler, registry, sink) = scheduler(1, Duration::from_millis(100));

        let _running = scheduler.submit(spec("first"), false).await.unwrap();
        let queued = scheduler.submit(spec("second"), false).await.unwrap();
        scheduler.cancel(&queued.id).unwrap();

        let task = registry.get(&queued.id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.started_at.is_none());
        assert!(task.exit_code.is_none());
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.list(&queued.id).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_and_terminal() {
        let (scheduler, registry, _) = scheduler(2, Duration::from_secs(30));

        let task = scheduler.submit(spec("long"), false).await.unwrap();
        scheduler.cancel(&task.id).unwrap();
        wait_until(|| registry.get(&task.id).unwrap().is_terminal()).await;

        let done = registry.get(&task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Cancelled);
        assert!(done.exit_code.is_none());

        for _ in 0..2 {
            assert!(matches!(
                scheduler.cancel(&task.id),
                Err(Error::TaskNotCancellable { .. })
            ));
        }
        assert_eq!(registry.get(&task.id), Some(done));
        assert!(matches!(
            scheduler.cancel(&TaskId::new()),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_raise_limit_promotes() {
        let (scheduler, registry, _) = scheduler(1, Duration::from_millis(300));

        let ids: Vec<_> = submit_many(&scheduler, 3).await;
        assert_eq!(scheduler.running_count(), 1);

        scheduler.set_concurrency_limit(3).unwrap();
        assert_eq!(scheduler.running_count(), 3);
        for id in &ids {
            assert_eq!(registry.get(id).unwrap().status, TaskStatus::Running);
        }

        assert!(scheduler.set_concurrency_limit(0).is_err());
        assert_eq!(scheduler.concurrency_limit(), 3);
    }

    #[tokio::test]
    async fn test_lower_limit_does_not_preempt() {
        let (scheduler, _, _) = scheduler(3, Duration::from_millis(300));
        submit_many(&scheduler, 4).await;
        assert_eq!(scheduler.running_count(), 3);

        scheduler.set_concurrency_limit(1).unwrap();
        assert_eq!(scheduler.running_count(), 3);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_admission_errors_create_nothing() {
        let (scheduler, registry, _) = scheduler(1, Duration::from_millis(10));

        assert!(matches!(
            scheduler.submit(spec("   "), false).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            scheduler
                .submit(TaskSpec::new("t1", "ls", "relative/dir"), false)
                .await,
            Err(Error::InvalidCwd(_))
        ));
        assert!(matches!(
            scheduler
                .submit(TaskSpec::new("ghost", "ls", std::env::temp_dir()), false)
                .await,
            Err(Error::ThreadNotFound(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_limit_change_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (scheduler, registry, _) =
            runtime.block_on(async { scheduler(1, Duration::from_millis(300)) });
        let ids = runtime.block_on(submit_many(&scheduler, 2));

        let remote = scheduler.clone();
        std::thread::spawn(move || remote.set_concurrency_limit(2))
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.running_count(), 2);
        assert_ne!(registry.get(&ids[1]).unwrap().status, TaskStatus::Queued);
        runtime.block_on(wait_until(|| {
            ids.iter().all(|id| registry.get(id).unwrap().is_terminal())
        }));
    }

    async fn submit_many(scheduler: &Scheduler, n: usize) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            ids.push(scheduler.submit(spec(&format!("task {}", i)), false).await.unwrap().id);
        }
        ids
    }
}
