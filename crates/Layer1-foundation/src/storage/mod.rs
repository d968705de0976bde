//! Storage module for deskrun
//!
//! - `db`: SQLite - durable task records and output lines
//! - `json`: JSON - general file save/load (config)

mod db;
mod json;

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// SQLite Storage
pub use db::Storage;

// JSON Storage
pub use json::{read_json, JsonStore};

/// Persisted form of a task
///
/// Status and shell are kept as plain strings so the storage layer does not
/// depend on the engine's types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub thread_id: String,
    pub command: String,
    pub cwd: String,
    /// JSON-encoded shell (`{"program": ..., "args": [...]}`)
    pub shell: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persisted output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogRecord {
    /// Capture sequence assigned by the engine run that wrote the line.
    /// Orders lines; the store keys rows itself.
    pub id: u64,
    pub task_id: String,
    pub stream: String,
    pub line: String,
    pub created_at: DateTime<Utc>,
}

/// Durable backing for the task registry and log sink
///
/// Calls are synchronous and may wait on disk. The engine makes them from a
/// dedicated writer thread, never from its scheduling path, and treats
/// failures as non-fatal.
pub trait RecordStore: Send + Sync {
    /// Insert a task or update its mutable columns
    fn upsert_task(&self, task: &TaskRecord) -> Result<()>;

    /// Append one output line; lines of a task load back in append order
    fn append_log(&self, line: &TaskLogRecord) -> Result<()>;

    /// All tasks in creation order
    fn load_tasks(&self) -> Result<Vec<TaskRecord>>;

    /// Tasks of one thread in creation order
    fn load_tasks_for_thread(&self, thread_id: &str) -> Result<Vec<TaskRecord>>;

    /// Output lines of one task in append order
    fn load_logs(&self, task_id: &str) -> Result<Vec<TaskLogRecord>>;
}
