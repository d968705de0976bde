//! Config - engine settings
//!
//! - `engine.rs` - `EngineConfig` (global + project `engine.json`)

mod engine;

pub use engine::{
    EngineConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_GRACE_PERIOD_MS, DEFAULT_MAX_CONCURRENT,
    ENGINE_CONFIG_FILE,
};
