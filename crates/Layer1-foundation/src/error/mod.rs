//! Error types for deskrun
//!
//! Every fallible operation in the workspace reports through this one enum.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// deskrun error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Admission
    // ========================================================================
    /// Destructive command on a `danger-confirm` thread without confirmation.
    /// Resubmitting with confirmation is allowed.
    #[error("Permission required on thread {thread_id}: {reason}")]
    PermissionRequired { thread_id: String, reason: String },

    /// Destructive command on a `safe` thread. No override exists.
    #[error("Permission denied on thread {thread_id}: {reason}")]
    PermissionDenied { thread_id: String, reason: String },

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Invalid working directory: {0}")]
    InvalidCwd(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Task lifecycle
    // ========================================================================
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Task {task_id} is not cancellable (status: {status})")]
    TaskNotCancellable { task_id: String, status: String },

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Process IO error: {0}")]
    ProcessIo(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller can act on this error and try again
    /// (resubmit with confirmation, fix the input, or just ignore it).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PermissionRequired { .. }
                | Error::TaskNotCancellable { .. }
                | Error::InvalidCwd(_)
                | Error::InvalidInput(_)
                | Error::Timeout(_)
        )
    }

    /// Whether the error is meant to be shown to the user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::PermissionRequired { .. }
                | Error::PermissionDenied { .. }
                | Error::ThreadNotFound(_)
                | Error::InvalidCwd(_)
                | Error::InvalidInput(_)
                | Error::TaskNotFound(_)
                | Error::TaskNotCancellable { .. }
        )
    }

    /// Internal consistency failures. These indicate a defect, never user error.
    pub fn is_defect(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. } | Error::Internal(_))
    }

    pub fn permission_required(thread_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PermissionRequired {
            thread_id: thread_id.into(),
            reason: reason.into(),
        }
    }

    pub fn permission_denied(thread_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PermissionDenied {
            thread_id: thread_id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(
        task_id: impl std::fmt::Display,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidTransition {
            task_id: task_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_cancellable(task_id: impl std::fmt::Display, status: impl std::fmt::Display) -> Self {
        Error::TaskNotCancellable {
            task_id: task_id.to_string(),
            status: status.to_string(),
        }
    }
}
