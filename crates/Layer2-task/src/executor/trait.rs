//! Executor trait

use crate::event::{EventBus, TaskEvent};
use crate::log::{LogSink, LogStream, TaskLogLine};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Exit code recorded when no real one exists (spawn failure, killed by signal)
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own with this code
    Exited(i32),

    /// Process ended by a signal without an exit code
    Signaled,

    /// Process could not be started
    SpawnFailed,

    /// Reading an output stream failed
    StreamFailed(Option<i32>),

    /// Per-task time limit elapsed and the process was terminated
    TimedOut,

    /// Process was terminated on request
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            RunOutcome::Exited(0) => TaskStatus::Succeeded,
            RunOutcome::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::Exited(code) => Some(*code),
            RunOutcome::Signaled | RunOutcome::SpawnFailed => Some(SYNTHETIC_EXIT_CODE),
            RunOutcome::StreamFailed(code) => *code,
            RunOutcome::TimedOut | RunOutcome::Cancelled => None,
        }
    }
}

/// Where an executor sends captured lines: the log sink first, then subscribers
#[derive(Clone)]
pub struct TaskOutput {
    task_id: TaskId,
    thread_id: Arc<str>,
    sink: Arc<LogSink>,
    events: Arc<EventBus>,
}

impl TaskOutput {
    pub fn new(task: &Task, sink: Arc<LogSink>, events: Arc<EventBus>) -> Self {
        Self {
            task_id: task.id,
            thread_id: Arc::from(task.thread_id.as_str()),
            sink,
            events,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn emit(&self, stream: LogStream, line: impl Into<String>) -> TaskLogLine {
        let line = self.sink.append(self.task_id, stream, line);
        self.events.publish(TaskEvent::log(&*self.thread_id, &line));
        line
    }

    pub fn stdout(&self, line: impl Into<String>) -> TaskLogLine {
        self.emit(LogStream::Stdout, line)
    }

    pub fn stderr(&self, line: impl Into<String>) -> TaskLogLine {
        self.emit(LogStream::Stderr, line)
    }
}

/// Executor trait - implement to add new execution backends
///
/// `run` must not return before the process is gone. Cancellation is requested
/// through `cancel`; the executor decides how to stop the process.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a task to completion
    async fn run(&self, task: &Task, output: TaskOutput, cancel: CancellationToken) -> RunOutcome;

    /// Get executor name
    fn name(&self) -> &'static str;
}
