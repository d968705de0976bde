//! SQLite storage for task records
//!
//! Durable copy of the engine's tasks and their output lines:
//! - `tasks`: one row per task, upserted on every state change
//! - `task_logs`: append-only output lines
//!
//! The in-memory state machine stays authoritative during a run; this store
//! only makes the records survive a restart.
//!
//! ## Migration System
//!
//! Database schema is versioned through `schema_version`.
//! - Version 1: Initial schema (tasks, task_logs)
//! - Version 2: `task_logs` keyed by an autoincrement `row_id`; the engine's
//!   line number moves to `seq`, so separate engine runs never collide

use super::{RecordStore, TaskLogRecord, TaskRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Storage service for persisting task records
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create data directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        debug!("Opened task database at {}", path.display());
        Ok(storage)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Tasks table
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                command TEXT NOT NULL,
                cwd TEXT NOT NULL,
                shell TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('queued', 'running', 'succeeded', 'failed', 'cancelled')),
                exit_code INTEGER,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_thread
                ON tasks(thread_id);

            -- Task output lines
            CREATE TABLE IF NOT EXISTS task_logs (
                id INTEGER PRIMARY KEY,
                task_id TEXT NOT NULL,
                stream TEXT NOT NULL CHECK(stream IN ('stdout', 'stderr')),
                line TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            );

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;
        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => warn!("Unknown migration version: {}", version),
            }
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;
            info!("Applied migration {}", version);
        }

        Ok(())
    }

    /// Rebuild `task_logs` with a store-assigned key, keeping existing rows
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            BEGIN;

            ALTER TABLE task_logs RENAME TO task_logs_v1;

            CREATE TABLE task_logs (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                seq INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                stream TEXT NOT NULL CHECK(stream IN ('stdout', 'stderr')),
                line TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            );

            INSERT INTO task_logs (seq, task_id, stream, line, created_at)
                SELECT id, task_id, stream, line, created_at
                FROM task_logs_v1 ORDER BY id;

            DROP TABLE task_logs_v1;
            DROP INDEX IF EXISTS idx_task_logs_task;

            CREATE INDEX IF NOT EXISTS idx_task_logs_task
                ON task_logs(task_id, row_id);

            COMMIT;
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to migrate task_logs: {}", e)))
    }

    /// Number of stored tasks
    pub fn task_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to count tasks: {}", e)))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

struct RawTask {
    id: String,
    thread_id: String,
    command: String,
    cwd: String,
    shell: String,
    status: String,
    exit_code: Option<i32>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            command: row.get(2)?,
            cwd: row.get(3)?,
            shell: row.get(4)?,
            status: row.get(5)?,
            exit_code: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id,
            thread_id: self.thread_id,
            command: self.command,
            cwd: self.cwd,
            shell: self.shell,
            status: self.status,
            exit_code: self.exit_code,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

const TASK_COLUMNS: &str = "id, thread_id, command, cwd, shell, status, exit_code, \
                            created_at, started_at, finished_at";

// ============================================================================
// RecordStore
// ============================================================================

impl RecordStore for Storage {
    fn upsert_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO tasks (id, thread_id, command, cwd, shell, status, exit_code,
                               created_at, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                exit_code = excluded.exit_code,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at
            "#,
            params![
                task.id,
                task.thread_id,
                task.command,
                task.cwd,
                task.shell,
                task.status,
                task.exit_code,
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.finished_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save task {}: {}", task.id, e)))?;

        Ok(())
    }

    fn append_log(&self, line: &TaskLogRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO task_logs (seq, task_id, stream, line, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                line.id as i64,
                line.task_id,
                line.stream,
                line.line,
                line.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to append log line: {}", e)))?;

        Ok(())
    }

    fn load_tasks(&self) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM tasks ORDER BY rowid", TASK_COLUMNS))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let raw = stmt
            .query_map([], RawTask::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query tasks: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read task row: {}", e)))?;

        raw.into_iter().map(RawTask::into_record).collect()
    }

    fn load_tasks_for_thread(&self, thread_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE thread_id = ?1 ORDER BY rowid",
                TASK_COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let raw = stmt
            .query_map(params![thread_id], RawTask::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query tasks: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read task row: {}", e)))?;

        raw.into_iter().map(RawTask::into_record).collect()
    }

    fn load_logs(&self, task_id: &str) -> Result<Vec<TaskLogRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT seq, task_id, stream, line, created_at
                FROM task_logs WHERE task_id = ?1 ORDER BY row_id
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| Error::Storage(format!("Failed to query logs: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Failed to read log row: {}", e)))?;

        rows.into_iter()
            .map(|(seq, task_id, stream, line, created_at)| {
                Ok(TaskLogRecord {
                    id: seq as u64,
                    task_id,
                    stream,
                    line,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
