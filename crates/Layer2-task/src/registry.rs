//! Task Registry - authoritative lifecycle state for every task
//!
//! Only the scheduler and executor path mutate tasks, always through
//! [`TaskRegistry::transition`]. Readers get whole-task snapshots.
//!
//! With a [`RecordWriter`] attached, every change is queued for persistence
//! while the registry lock is held, so queued writes follow transition order.

use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskSpec};
use crate::writer::RecordWriter;
use chrono::Utc;
use deskrun_foundation::{Error, Result, Shell};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Extra fields applied with a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionFields {
    /// Recorded only when entering a terminal state
    pub exit_code: Option<i32>,
}

impl TransitionFields {
    pub fn exit_code(code: Option<i32>) -> Self {
        Self { exit_code: code }
    }
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<TaskId, Task>,

    /// Creation order
    order: Vec<TaskId>,
}

pub struct TaskRegistry {
    inner: RwLock<RegistryInner>,

    default_shell: Shell,

    writer: Option<Arc<RecordWriter>>,
}

impl TaskRegistry {
    pub fn new(default_shell: Shell) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            default_shell,
            writer: None,
        }
    }

    pub fn with_writer(mut self, writer: Arc<RecordWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn default_shell(&self) -> &Shell {
        &self.default_shell
    }

    /// Register a new `Queued` task
    pub fn create(&self, spec: TaskSpec) -> Task {
        let task = Task::new(spec, &self.default_shell);
        {
            let mut inner = self.inner.write();
            inner.order.push(task.id);
            inner.tasks.insert(task.id, task.clone());
            self.persist(&task);
        }
        debug!("Registered task {} for thread {}", task.id.short(), task.thread_id);
        task
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.read().tasks.get(id).cloned()
    }

    /// Tasks of one thread in creation order
    pub fn list(&self, thread_id: &str) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| t.thread_id == thread_id)
            .cloned()
            .collect()
    }

    /// Every task in creation order
    pub fn list_all(&self) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tasks.is_empty()
    }

    /// Move a task to `status`, stamping timestamps.
    ///
    /// Fails with `InvalidTransition` for moves outside the state machine; that
    /// is an engine defect and is logged as such.
    pub fn transition(&self, id: &TaskId, status: TaskStatus, fields: TransitionFields) -> Result<Task> {
        let task = {
            let mut inner = self.inner.write();
            let task = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

            if !task.status.can_transition_to(status) {
                error!(
                    "Invalid transition for task {}: {} -> {}",
                    id, task.status, status
                );
                return Err(Error::invalid_transition(id, task.status, status));
            }

            // Timestamps never go backwards even if the wall clock does
            let floor = task
                .finished_at
                .or(task.started_at)
                .unwrap_or(task.created_at);
            let now = Utc::now().max(floor);

            task.status = status;
            if status == TaskStatus::Running {
                task.started_at = Some(now);
            }
            if status.is_terminal() {
                task.finished_at = Some(now);
                task.exit_code = fields.exit_code;
            }
            let task = task.clone();
            self.persist(&task);
            task
        };

        debug!("Task {} -> {}", task.id.short(), task.status);
        Ok(task)
    }

    /// Insert a task loaded from storage, without writing it back
    pub(crate) fn insert_restored(&self, task: Task) -> bool {
        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&task.id) {
            return false;
        }
        inner.order.push(task.id);
        inner.tasks.insert(task.id, task);
        true
    }

    /// Queue a task snapshot; never waits on the store
    fn persist(&self, task: &Task) {
        if let Some(writer) = &self.writer {
            writer.upsert_task(task);
        }
    }
}
