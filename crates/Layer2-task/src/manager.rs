//! Task Manager - the engine's public surface
//!
//! Features:
//! - Submission through the permission gate and scheduler
//! - Cancellation and concurrency control
//! - Task and log queries
//! - Event subscription and waiting for completion
//! - Optional persistence with restore after restart

use crate::event::{EventBus, TaskEvent};
use crate::executor::{Executor, LocalExecutor, LocalExecutorConfig};
use crate::gate::PermissionGate;
use crate::log::{LogSink, TaskLogLine};
use crate::registry::TaskRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskSpec};
use crate::writer::RecordWriter;
use chrono::Utc;
use deskrun_foundation::{
    CommandClassifier, EngineConfig, Error, PatternClassifier, RecordStore, Result, Shell,
    ThreadDirectory,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Stderr line recorded on tasks that were running when the engine stopped
pub const INTERRUPTED_LINE: &str = "interrupted: engine restarted while task was running";

/// Configuration for task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum concurrent tasks
    pub max_concurrent: usize,

    /// Shell for submissions that name none
    pub default_shell: Shell,

    /// Wait between graceful termination and kill
    pub grace_period: Duration,

    /// Event channel capacity
    pub event_capacity: usize,

    /// Per-task log retention (unbounded when `None`)
    pub max_log_lines_per_task: Option<usize>,

    /// Check `cwd` at submission
    pub validate_cwd: bool,

    /// Regexes added to the default destructive classifier
    pub extra_destructive_patterns: Vec<String>,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: deskrun_foundation::DEFAULT_MAX_CONCURRENT,
            default_shell: Shell::platform_default(),
            grace_period: Duration::from_millis(deskrun_foundation::DEFAULT_GRACE_PERIOD_MS),
            event_capacity: deskrun_foundation::DEFAULT_EVENT_CAPACITY,
            max_log_lines_per_task: None,
            validate_cwd: true,
            extra_destructive_patterns: Vec::new(),
        }
    }
}

impl TaskManagerConfig {
    /// Resolve a loaded `EngineConfig`
    pub fn from_engine_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_concurrent: config.max_concurrent(),
            default_shell: config.shell()?,
            grace_period: config.grace_period(),
            event_capacity: config.event_capacity(),
            max_log_lines_per_task: config.max_log_lines_per_task,
            validate_cwd: config.validate_cwd(),
            extra_destructive_patterns: config.extra_destructive_patterns.clone(),
        })
    }
}

/// `submitTask` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub thread_id: String,
    pub command: String,
    pub cwd: PathBuf,
    pub shell: Option<Shell>,
    /// Confirms a destructive command on a `danger-confirm` thread
    pub confirm_destructive: bool,
    pub timeout: Option<Duration>,
}

impl SubmitRequest {
    pub fn new(
        thread_id: impl Into<String>,
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            command: command.into(),
            cwd: cwd.into(),
            shell: None,
            confirm_destructive: false,
            timeout: None,
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn confirmed(mut self, confirm: bool) -> Self {
        self.confirm_destructive = confirm;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_spec(self) -> (TaskSpec, bool) {
        let spec = TaskSpec {
            thread_id: self.thread_id,
            command: self.command,
            cwd: self.cwd,
            shell: self.shell,
            timeout: self.timeout,
        };
        (spec, self.confirm_destructive)
    }
}

/// Counters across all tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskManagerStats {
    pub scheduler: SchedulerStats,
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub events_published: u64,
    /// Persistence writes that did not reach the store
    pub failed_writes: u64,
}

/// Builder for [`TaskManager`]
pub struct TaskManagerBuilder {
    config: TaskManagerConfig,
    threads: Arc<dyn ThreadDirectory>,
    store: Option<Arc<dyn RecordStore>>,
    classifier: Option<Arc<dyn CommandClassifier>>,
    executor: Option<Arc<dyn Executor>>,
}

impl TaskManagerBuilder {
    /// Persist tasks and log lines through `store`
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the destructive-command classifier (extra patterns are then ignored)
    pub fn with_classifier(mut self, classifier: Arc<dyn CommandClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the process executor
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Must be called inside a tokio runtime; tasks run on that runtime
    /// whichever thread later drives the manager.
    pub fn build(self) -> Result<TaskManager> {
        let config = self.config;
        if config.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".to_string()));
        }

        let runtime = Handle::try_current().map_err(|e| {
            Error::Internal(format!("task manager must be built inside a tokio runtime: {}", e))
        })?;

        let classifier: Arc<dyn CommandClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(PatternClassifier::with_extra_patterns(
                config.extra_destructive_patterns.iter(),
            )?),
        };

        let writer = match &self.store {
            Some(store) => Some(Arc::new(RecordWriter::spawn(Arc::clone(store))?)),
            None => None,
        };

        let mut registry = TaskRegistry::new(config.default_shell.clone());
        let mut sink = LogSink::new().with_max_lines_per_task(config.max_log_lines_per_task);
        if let Some(writer) = &writer {
            registry = registry.with_writer(Arc::clone(writer));
            sink = sink.with_writer(Arc::clone(writer));
        }
        let registry = Arc::new(registry);
        let sink = Arc::new(sink);
        let events = Arc::new(EventBus::new(config.event_capacity));

        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(LocalExecutor::with_config(LocalExecutorConfig {
                grace_period: config.grace_period,
            }))
        });
        debug!("Using {} executor", executor.name());

        let gate = PermissionGate::new(self.threads).with_classifier(classifier);
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: config.max_concurrent,
                validate_cwd: config.validate_cwd,
            },
            Arc::clone(&registry),
            Arc::clone(&sink),
            Arc::clone(&events),
            gate,
            executor,
            runtime,
        );

        Ok(TaskManager {
            registry,
            sink,
            events,
            scheduler,
            store: self.store,
            writer,
        })
    }
}

/// Task Manager - handles task lifecycle and execution
#[derive(Clone)]
pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    sink: Arc<LogSink>,
    events: Arc<EventBus>,
    scheduler: Scheduler,
    store: Option<Arc<dyn RecordStore>>,
    writer: Option<Arc<RecordWriter>>,
}

impl TaskManager {
    pub fn builder(config: TaskManagerConfig, threads: Arc<dyn ThreadDirectory>) -> TaskManagerBuilder {
        TaskManagerBuilder {
            config,
            threads,
            store: None,
            classifier: None,
            executor: None,
        }
    }

    /// Manager with the default classifier, local executor and no persistence
    pub fn new(config: TaskManagerConfig, threads: Arc<dyn ThreadDirectory>) -> Result<Self> {
        Self::builder(config, threads).build()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Submit a command. Returns the task as created (`Queued`); admission
    /// errors are returned here and create nothing.
    pub async fn submit_task(&self, request: SubmitRequest) -> Result<Task> {
        let (spec, confirm) = request.into_spec();
        self.scheduler.submit(spec, confirm).await
    }

    pub fn cancel_task(&self, id: &TaskId) -> Result<()> {
        self.scheduler.cancel(id)
    }

    /// Cancel every queued and running task
    pub fn cancel_all(&self) -> usize {
        self.scheduler.cancel_all()
    }

    /// Tasks of a thread in creation order
    pub fn list_tasks(&self, thread_id: &str) -> Vec<Task> {
        self.registry.list(thread_id)
    }

    pub fn list_all_tasks(&self) -> Vec<Task> {
        self.registry.list_all()
    }

    /// Output lines of a task in capture order
    pub fn list_task_logs(&self, id: &TaskId) -> Result<Vec<TaskLogLine>> {
        if self.registry.get(id).is_none() {
            return Err(Error::TaskNotFound(id.to_string()));
        }
        Ok(self.sink.list(id))
    }

    pub fn set_concurrency_limit(&self, limit: usize) -> Result<()> {
        self.scheduler.set_concurrency_limit(limit)
    }

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Wait until a task reaches a terminal state
    pub async fn wait(&self, id: &TaskId, timeout: Option<Duration>) -> Result<Task> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_terminal(id))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("task {} not finished after {:?}", id, limit))
                })?,
            None => self.wait_terminal(id).await,
        }
    }

    async fn wait_terminal(&self, id: &TaskId) -> Result<Task> {
        // Subscribe before checking so the terminal event cannot slip between
        let mut rx = self.events.subscribe();

        loop {
            let task = self
                .registry
                .get(id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            if task.is_terminal() {
                return Ok(task);
            }

            loop {
                match rx.recv().await {
                    Ok(event) if event.task_id() == *id && event.terminal_status().is_some() => {
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Waiter lagged by {} events, re-checking", skipped);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("event bus closed".to_string()));
                    }
                }
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.scheduler.concurrency_limit()
    }

    pub fn stats(&self) -> TaskManagerStats {
        TaskManagerStats {
            scheduler: self.scheduler.stats(),
            total: self.registry.len(),
            queued: self.registry.count_by_status(TaskStatus::Queued),
            running: self.registry.count_by_status(TaskStatus::Running),
            succeeded: self.registry.count_by_status(TaskStatus::Succeeded),
            failed: self.registry.count_by_status(TaskStatus::Failed),
            cancelled: self.registry.count_by_status(TaskStatus::Cancelled),
            events_published: self.events.published_count(),
            failed_writes: self.writer.as_ref().map_or(0, |w| w.failed_writes()),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Wait until every state change and log line so far is in the store
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    /// Reload persisted tasks and their logs. Tasks left non-terminal by an
    /// interrupted run are closed: `Queued` becomes `Cancelled`, `Running`
    /// becomes `Failed` with an explanatory stderr line.
    ///
    /// Call before submitting new work. Returns the number of tasks loaded.
    pub fn restore(&self) -> Result<usize> {
        let (Some(store), Some(writer)) = (&self.store, &self.writer) else {
            return Ok(0);
        };

        let mut loaded = 0;
        let mut interrupted = Vec::new();

        for record in store.load_tasks()? {
            let mut task = Task::from_record(record)?;
            let logs = store
                .load_logs(&task.id.to_string())?
                .into_iter()
                .map(TaskLogLine::from_record)
                .collect::<Result<Vec<_>>>()?;

            let was = task.status;
            if task.status.is_active() {
                task.status = match was {
                    TaskStatus::Running => TaskStatus::Failed,
                    _ => TaskStatus::Cancelled,
                };
                task.exit_code = None;
                task.finished_at = Some(Utc::now().max(task.started_at.unwrap_or(task.created_at)));
            }

            if !self.registry.insert_restored(task.clone()) {
                continue;
            }
            self.sink.restore(logs);
            loaded += 1;

            if was.is_active() {
                interrupted.push((task, was));
            }
        }

        for (task, was) in interrupted {
            warn!("Task {} was {} when the engine stopped; now {}", task.id.short(), was, task.status);
            if was == TaskStatus::Running {
                self.sink.append_stderr(task.id, INTERRUPTED_LINE);
            }
            writer.upsert_task(&task);
        }

        info!("Restored {} tasks", loaded);
        Ok(loaded)
    }
}
