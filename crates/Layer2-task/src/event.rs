//! Event Bus - task event broadcast
//!
//! The engine publishes every log line and status change; subscribers filter by
//! thread or task themselves.

use crate::log::{LogStream, TaskLogLine};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Event pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskEvent {
    /// One captured output line
    #[serde(rename = "task-log", rename_all = "camelCase")]
    Log {
        task_id: TaskId,
        thread_id: String,
        stream: LogStream,
        line: String,
    },

    /// A status change (including creation as `queued`)
    #[serde(rename = "task-status", rename_all = "camelCase")]
    Status {
        task_id: TaskId,
        thread_id: String,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl TaskEvent {
    pub fn log(thread_id: impl Into<String>, line: &TaskLogLine) -> Self {
        TaskEvent::Log {
            task_id: line.task_id,
            thread_id: thread_id.into(),
            stream: line.stream,
            line: line.line.clone(),
        }
    }

    pub fn status(task: &Task) -> Self {
        TaskEvent::Status {
            task_id: task.id,
            thread_id: task.thread_id.clone(),
            status: task.status,
            exit_code: task.exit_code,
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Log { task_id, .. } | TaskEvent::Status { task_id, .. } => *task_id,
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            TaskEvent::Log { thread_id, .. } | TaskEvent::Status { thread_id, .. } => thread_id,
        }
    }

    /// Terminal status carried by this event, if any
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            TaskEvent::Status { status, .. } if status.is_terminal() => Some(*status),
            _ => None,
        }
    }
}

/// Broadcast channel for task events
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,

    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    /// Publish an event. Having no subscriber is fine.
    pub fn publish(&self, event: TaskEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Events published since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(deskrun_foundation::DEFAULT_EVENT_CAPACITY)
    }
}
