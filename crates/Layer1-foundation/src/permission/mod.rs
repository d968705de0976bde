//! Permission - thread policies and destructive command detection
//!
//! - `policy.rs` - `ExecutionPolicy` (safe / normal / danger-confirm)
//! - `classifier.rs` - `CommandClassifier` trait and the regex `PatternClassifier`

mod classifier;
mod policy;

pub use classifier::{CommandClassifier, DestructiveCategory, DestructiveMatch, PatternClassifier};
pub use policy::ExecutionPolicy;
