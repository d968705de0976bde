//! Task executors
//!
//! - `LocalExecutor` - child process per task with live line streaming
//! - `ProcessTerminator` - platform process-tree termination (signals / taskkill)

pub mod local;
pub mod terminate;
pub mod r#trait;

pub use local::{LocalExecutor, LocalExecutorConfig};
pub use r#trait::{Executor, RunOutcome, TaskOutput, SYNTHETIC_EXIT_CODE};
pub use terminate::{platform_terminator, ProcessTerminator};
