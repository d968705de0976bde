//! Record writer - moves persistence off the scheduling path
//!
//! The registry and log sink hand snapshots to a channel; one dedicated thread
//! drains it into the `RecordStore`. Enqueueing never waits on disk, and the
//! single consumer keeps writes in the order they were made.

use crate::log::TaskLogLine;
use crate::task::Task;
use deskrun_foundation::{Error, RecordStore, Result, TaskLogRecord, TaskRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

enum WriteOp {
    Task(TaskRecord),
    Log(TaskLogRecord),
    Flush(oneshot::Sender<()>),
}

/// Write-behind queue in front of a `RecordStore`
///
/// Dropping the writer drains what is queued before returning.
pub struct RecordWriter {
    tx: Option<mpsc::Sender<WriteOp>>,

    worker: Option<JoinHandle<()>>,

    failed: Arc<AtomicU64>,
}

impl RecordWriter {
    /// Start the writer thread for `store`
    pub fn spawn(store: Arc<dyn RecordStore>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let failed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&failed);

        let worker = std::thread::Builder::new()
            .name("deskrun-records".to_string())
            .spawn(move || drain(rx, store.as_ref(), &counter))
            .map_err(|e| Error::Storage(format!("Failed to start record writer: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            failed,
        })
    }

    /// Queue the current state of a task
    pub fn upsert_task(&self, task: &Task) {
        match task.to_record() {
            Ok(record) => self.send(WriteOp::Task(record)),
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to encode task {}: {}", task.id, e);
            }
        }
    }

    /// Queue one output line
    pub fn append_log(&self, line: &TaskLogLine) {
        self.send(WriteOp::Log(line.to_record()));
    }

    /// Wait until everything queued so far is written
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(WriteOp::Flush(done));
        let _ = wait.await;
    }

    /// Blocking [`flush`](Self::flush) for callers outside a runtime
    pub fn flush_blocking(&self) {
        let (done, wait) = oneshot::channel();
        self.send(WriteOp::Flush(done));
        let _ = wait.blocking_recv();
    }

    /// Writes the store rejected since start
    pub fn failed_writes(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn send(&self, op: WriteOp) {
        let sent = self.tx.as_ref().map(|tx| tx.send(op).is_ok()).unwrap_or(false);
        if !sent {
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Record writer stopped; write dropped");
        }
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        // Closing the channel ends the worker after the backlog
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Record writer thread panicked");
            }
        }
    }
}

fn drain(rx: mpsc::Receiver<WriteOp>, store: &dyn RecordStore, failed: &AtomicU64) {
    while let Ok(op) = rx.recv() {
        let result = match op {
            WriteOp::Task(record) => store
                .upsert_task(&record)
                .map_err(|e| format!("task {}: {}", record.id, e)),
            WriteOp::Log(record) => store
                .append_log(&record)
                .map_err(|e| format!("log line of task {}: {}", record.task_id, e)),
            WriteOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };

        if let Err(e) = result {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to persist {}", e);
        }
    }
    debug!("Record writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogStream;
    use crate::task::TaskSpec;
    use chrono::Utc;
    use deskrun_foundation::{Shell, Storage};

    fn task() -> Task {
        Task::new(TaskSpec::new("t1", "echo hi", "/tmp"), &Shell::default())
    }

    fn line(task: &Task, id: u64, text: &str) -> TaskLogLine {
        TaskLogLine {
            id,
            task_id: task.id,
            stream: LogStream::Stdout,
            line: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_writes_in_order_after_flush() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let writer = RecordWriter::spawn(storage.clone()).unwrap();

        let mut task = task();
        writer.upsert_task(&task);
        for (id, text) in [(1, "a"), (2, "b"), (3, "c")] {
            writer.append_log(&line(&task, id, text));
        }
        task.status = crate::state::TaskStatus::Running;
        writer.upsert_task(&task);
        writer.flush_blocking();

        let rows = storage.load_tasks().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "running");

        let lines: Vec<_> = storage
            .load_logs(&task.id.to_string())
            .unwrap()
            .into_iter()
            .map(|r| r.line)
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
        assert_eq!(writer.failed_writes(), 0);
    }

    #[test]
    fn test_drop_drains_backlog() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let task = task();
        {
            let writer = RecordWriter::spawn(storage.clone()).unwrap();
            writer.upsert_task(&task);
            for id in 1..=50 {
                writer.append_log(&line(&task, id, "x"));
            }
        }
        assert_eq!(storage.load_logs(&task.id.to_string()).unwrap().len(), 50);
    }

    #[test]
    fn test_rejected_write_is_counted() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let writer = RecordWriter::spawn(storage.clone()).unwrap();

        let mut bad = task().to_record().unwrap();
        bad.status = "paused".to_string();
        writer.send(WriteOp::Task(bad));
        writer.flush_blocking();

        assert_eq!(writer.failed_writes(), 1);
        assert_eq!(storage.task_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_async_flush() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let writer = RecordWriter::spawn(storage.clone()).unwrap();
        writer.upsert_task(&task());
        writer.flush().await;
        assert_eq!(storage.task_count().unwrap(), 1);
    }
}
