//! # deskrun-foundation
//!
//! Foundation layer for deskrun:
//! - Error: crate-wide error taxonomy
//! - Permission: execution policies and destructive command classification
//! - Thread: thread-identity collaborator (`ThreadDirectory`)
//! - Shell: interpreter selection
//! - Storage: SQLite task records, JsonStore for settings
//! - Config: `EngineConfig`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  deskrun-task (TaskManager)                          │
//! │     │ admission            │ persistence             │
//! │     ▼                      ▼                         │
//! │  ThreadDirectory      RecordStore (Storage)          │
//! │  CommandClassifier    JsonStore (EngineConfig)       │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod permission;
pub mod shell;
pub mod storage;
pub mod thread;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    EngineConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_GRACE_PERIOD_MS, DEFAULT_MAX_CONCURRENT,
    ENGINE_CONFIG_FILE,
};

// ============================================================================
// Permission
// ============================================================================
pub use permission::{
    CommandClassifier, DestructiveCategory, DestructiveMatch, ExecutionPolicy, PatternClassifier,
};

// ============================================================================
// Thread
// ============================================================================
pub use thread::{InMemoryThreadDirectory, ThreadDirectory};

// ============================================================================
// Shell
// ============================================================================
pub use shell::{Shell, ShellType};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, RecordStore, Storage, TaskLogRecord, TaskRecord};
