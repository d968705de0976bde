//! Task definition and types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use deskrun_foundation::{Error, Result, Shell, TaskRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for log output
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid task id '{}': {}", s, e)))
    }
}

/// A submission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Thread this task belongs to
    pub thread_id: String,

    /// Literal command line handed to the shell
    pub command: String,

    /// Absolute working directory
    pub cwd: PathBuf,

    /// Interpreter; the engine default when `None`
    pub shell: Option<Shell>,

    /// Optional execution time limit
    pub timeout: Option<Duration>,
}

impl TaskSpec {
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
            timeout: None,
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One shell-command execution tracked through its lifecycle
///
/// Snapshots handed out by the registry are copies; mutation goes through the
/// registry's transition path only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Thread this task belongs to
    pub thread_id: String,

    /// Command line as submitted
    pub command: String,

    /// Working directory
    pub cwd: PathBuf,

    /// Interpreter the command runs under
    pub shell: Shell,

    /// Current status
    pub status: TaskStatus,

    /// Set only when a process exited (or failed to spawn)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    pub created_at: DateTime<Utc>,

    /// Set on entering `Running`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on entering a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Execution time limit requested on submission (not persisted)
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Task {
    /// Create a queued task from a submission
    pub fn new(spec: TaskSpec, default_shell: &Shell) -> Self {
        Self {
            id: TaskId::new(),
            thread_id: spec.thread_id,
            command: spec.command,
            cwd: spec.cwd,
            shell: spec.shell.unwrap_or_else(|| default_shell.clone()),
            status: TaskStatus::Queued,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            timeout: spec.timeout,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock run time, if the task has started
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }

    pub fn to_record(&self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id.to_string(),
            thread_id: self.thread_id.clone(),
            command: self.command.clone(),
            cwd: self.cwd.to_string_lossy().into_owned(),
            shell: serde_json::to_string(&self.shell)?,
            status: self.status.as_str().to_string(),
            exit_code: self.exit_code,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }

    pub fn from_record(record: TaskRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.parse()?,
            thread_id: record.thread_id,
            command: record.command,
            cwd: PathBuf::from(record.cwd),
            shell: serde_json::from_str(&record.shell)?,
            status: record.status.parse()?,
            exit_code: record.exit_code,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            timeout: None,
        })
    }
}
