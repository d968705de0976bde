//! # deskrun-task
//!
//! Local task-execution engine for deskrun.
//! Runs shell commands scoped to a thread as child processes, under a
//! configurable concurrency cap, with live output streaming and cancellation.
//!
//! ## Features
//!
//! - Permission gate for destructive commands (per-thread policy)
//! - Task registry with a strict lifecycle state machine
//! - Scheduler with a global FIFO waiting list
//! - Process executor with line streaming and process-tree termination
//! - Log sink with per-task ordered output
//! - Event bus (`task-log` / `task-status`)
//! - Optional write-behind persistence through a `RecordStore`
//!
//! ```text
//! submit ─► PermissionGate ─► TaskRegistry (Queued) ─► Scheduler ─┬─► LocalExecutor
//!                                                                 │     │ lines
//!                                                                 │     ▼
//!                                                terminal ◄───────┘  LogSink + EventBus
//! ```

pub mod event;
pub mod executor;
pub mod gate;
pub mod log;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod writer;

// Task system
pub use manager::{
    SubmitRequest, TaskManager, TaskManagerBuilder, TaskManagerConfig, TaskManagerStats,
    INTERRUPTED_LINE,
};
pub use registry::{TaskRegistry, TransitionFields};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use state::TaskStatus;
pub use task::{Task, TaskId, TaskSpec};
pub use writer::RecordWriter;

// Execution
pub use executor::{
    platform_terminator, Executor, LocalExecutor, LocalExecutorConfig, ProcessTerminator,
    RunOutcome, TaskOutput, SYNTHETIC_EXIT_CODE,
};
pub use gate::{GateDecision, PermissionGate};

// Logs and events
pub use event::{EventBus, TaskEvent};
pub use log::{LogSink, LogStream, TaskLogLine};
