//! Task Log Sink - ordered per-task output storage
//!
//! Provides:
//! - Append-only capture of stdout/stderr lines (single writer: the executor)
//! - Snapshot reads while a task is still running
//! - Optional per-task retention cap
//! - Write-behind persistence through a [`RecordWriter`]

use crate::task::TaskId;
use crate::writer::RecordWriter;
use chrono::{DateTime, Utc};
use deskrun_foundation::{Result, TaskLogRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Which standard stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(LogStream::Stdout),
            "stderr" => Some(LogStream::Stderr),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One captured output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogLine {
    /// Increasing within one engine run; orders lines of a task by capture
    pub id: u64,

    pub task_id: TaskId,

    pub stream: LogStream,

    /// Text without the trailing newline
    pub line: String,

    /// Capture time
    pub created_at: DateTime<Utc>,
}

impl TaskLogLine {
    pub fn to_record(&self) -> TaskLogRecord {
        TaskLogRecord {
            id: self.id,
            task_id: self.task_id.to_string(),
            stream: self.stream.as_str().to_string(),
            line: self.line.clone(),
            created_at: self.created_at,
        }
    }

    pub fn from_record(record: TaskLogRecord) -> Result<Self> {
        let stream = LogStream::parse(&record.stream).ok_or_else(|| {
            deskrun_foundation::Error::Storage(format!("unknown log stream '{}'", record.stream))
        })?;
        Ok(Self {
            id: record.id,
            task_id: record.task_id.parse()?,
            stream,
            line: record.line,
            created_at: record.created_at,
        })
    }
}

/// Log buffer for a single task
#[derive(Debug, Default)]
struct TaskLogBuffer {
    lines: VecDeque<TaskLogLine>,

    /// Lines evicted by the retention cap
    dropped: usize,
}

impl TaskLogBuffer {
    fn push(&mut self, line: TaskLogLine, max_lines: Option<usize>) {
        self.lines.push_back(line);
        if let Some(max) = max_lines {
            while self.lines.len() > max {
                self.lines.pop_front();
                self.dropped += 1;
            }
        }
    }
}

/// Append-only output store for all tasks
pub struct LogSink {
    buffers: RwLock<HashMap<TaskId, TaskLogBuffer>>,

    next_id: AtomicU64,

    max_lines_per_task: Option<usize>,

    writer: Option<Arc<RecordWriter>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_lines_per_task: None,
            writer: None,
        }
    }

    /// Keep at most `max` lines per task (oldest dropped first)
    pub fn with_max_lines_per_task(mut self, max: Option<usize>) -> Self {
        self.max_lines_per_task = max;
        self
    }

    pub fn with_writer(mut self, writer: Arc<RecordWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Append a line. Id, capture time and the persistence queue position are
    /// all taken under the write lock so every ordering agrees.
    pub fn append(&self, task_id: TaskId, stream: LogStream, line: impl Into<String>) -> TaskLogLine {
        let entry = {
            let mut buffers = self.buffers.write();
            let entry = TaskLogLine {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                task_id,
                stream,
                line: line.into(),
                created_at: Utc::now(),
            };
            if let Some(writer) = &self.writer {
                writer.append_log(&entry);
            }
            buffers
                .entry(task_id)
                .or_default()
                .push(entry.clone(), self.max_lines_per_task);
            entry
        };

        trace!("[{}] {}: {}", task_id.short(), stream, entry.line);
        entry
    }

    pub fn append_stdout(&self, task_id: TaskId, line: impl Into<String>) -> TaskLogLine {
        self.append(task_id, LogStream::Stdout, line)
    }

    pub fn append_stderr(&self, task_id: TaskId, line: impl Into<String>) -> TaskLogLine {
        self.append(task_id, LogStream::Stderr, line)
    }

    /// All retained lines of a task in capture order
    pub fn list(&self, task_id: &TaskId) -> Vec<TaskLogLine> {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| b.lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Lines of one stream in production order
    pub fn list_stream(&self, task_id: &TaskId, stream: LogStream) -> Vec<TaskLogLine> {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| b.lines.iter().filter(|l| l.stream == stream).cloned().collect())
            .unwrap_or_default()
    }

    /// Last `n` lines of a task
    pub fn tail(&self, task_id: &TaskId, n: usize) -> Vec<TaskLogLine> {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| {
                let skip = b.lines.len().saturating_sub(n);
                b.lines.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn line_count(&self, task_id: &TaskId) -> usize {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| b.lines.len())
            .unwrap_or(0)
    }

    /// Lines evicted for a task by the retention cap
    pub fn dropped_count(&self, task_id: &TaskId) -> usize {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| b.dropped)
            .unwrap_or(0)
    }

    /// Load previously persisted lines without writing them back
    pub(crate) fn restore(&self, lines: Vec<TaskLogLine>) {
        let mut buffers = self.buffers.write();
        for line in lines {
            let next = line.id.saturating_add(1);
            self.next_id.fetch_max(next, Ordering::Relaxed);
            buffers
                .entry(line.task_id)
                .or_default()
                .push(line, self.max_lines_per_task);
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrun_foundation::{RecordStore, Storage};

    #[test]
    fn test_append_and_list_in_order() {
        let sink = LogSink::new();
        let task = TaskId::new();

        sink.append_stdout(task, "a");
        sink.append_stderr(task, "x");
        sink.append_stdout(task, "b");

        let lines = sink.list(&task);
        assert_eq!(lines.len(), 3);
        assert!(lines.windows(2).all(|w| w[0].id < w[1].id));
        assert!(lines.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let stdout: Vec<_> = sink
            .list_stream(&task, LogStream::Stdout)
            .into_iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(stdout, vec!["a", "b"]);

        // Stable across reads
        assert_eq!(sink.list(&task), lines);
    }

    #[test]
    fn test_unknown_task_is_empty() {
        let sink = LogSink::new();
        assert!(sink.list(&TaskId::new()).is_empty());
        assert_eq!(sink.line_count(&TaskId::new()), 0);
    }

    #[test]
    fn test_tasks_are_isolated() {
        let sink = LogSink::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        sink.append_stdout(a, "from a");
        sink.append_stdout(b, "from b");

        assert_eq!(sink.list(&a).len(), 1);
        assert_eq!(sink.list(&b)[0].line, "from b");
    }

    #[test]
    fn test_retention_cap() {
        let sink = LogSink::new().with_max_lines_per_task(Some(2));
        let task = TaskId::new();
        for i in 0..5 {
            sink.append_stdout(task, format!("line {}", i));
        }

        let lines: Vec<_> = sink.list(&task).into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["line 3", "line 4"]);
        assert_eq!(sink.dropped_count(&task), 3);
        assert_eq!(sink.tail(&task, 1)[0].line, "line 4");
    }

    #[test]
    fn test_write_behind_and_restore() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let writer = Arc::new(RecordWriter::spawn(storage.clone()).unwrap());
        let sink = LogSink::new().with_writer(writer.clone());
        let task = TaskId::new();

        // Log rows reference a task row
        let record = crate::task::Task::new(
            crate::task::TaskSpec::new("t1", "echo", "/tmp"),
            &deskrun_foundation::Shell::default(),
        );
        let mut record = record.to_record().unwrap();
        record.id = task.to_string();
        storage.upsert_task(&record).unwrap();

        sink.append_stdout(task, "persisted");
        writer.flush_blocking();
        let rows = storage.load_logs(&task.to_string()).unwrap();
        assert_eq!(rows.len(), 1);

        let restored = LogSink::new();
        restored.restore(
            rows.into_iter()
                .map(|r| TaskLogLine::from_record(r).unwrap())
                .collect(),
        );
        assert_eq!(restored.list(&task)[0].line, "persisted");

        // New ids continue after restored ones
        let next = restored.append_stdout(task, "after");
        assert!(next.id > restored.list(&task)[0].id);
    }
}
