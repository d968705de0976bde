//! Engine Config
//!
//! Settings for the scheduler, executor and persistence. Every field is optional
//! in the file so a project file only needs to name what it overrides.

use crate::shell::Shell;
use crate::storage::{read_json, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 3000;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on simultaneously running tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    /// Shell used when a submission names none (e.g. "bash", "pwsh")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<String>,

    /// Wait between graceful termination and force-kill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,

    /// Event channel capacity per subscriber
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,

    /// Oldest lines of a task are dropped beyond this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_log_lines_per_task: Option<usize>,

    /// Reject submissions whose cwd is not an existing absolute directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_cwd: Option<bool>,

    /// Additional destructive-command regexes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_destructive_patterns: Vec<String>,

    /// SQLite file for task persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + current project, project wins
    pub fn load() -> Result<Self> {
        let global = JsonStore::global().ok();
        let project = JsonStore::current_project().ok();
        Self::load_layered(global.as_ref(), project.as_ref())
    }

    /// Merge the given layers in order; missing files are skipped
    pub fn load_layered(global: Option<&JsonStore>, project: Option<&JsonStore>) -> Result<Self> {
        let mut config = Self::new();

        for store in [global, project].into_iter().flatten() {
            config.merge(Self::load_layer(store)?);
        }

        Ok(config)
    }

    /// The file of one layer alone; a missing file is an empty layer
    pub fn load_layer(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<EngineConfig>(ENGINE_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// Load one explicit file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path)
    }

    /// Validate, then write as the layer file of `store`
    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        self.validate()?;
        store.save(ENGINE_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge with another config (other wins; patterns accumulate)
    pub fn merge(&mut self, other: EngineConfig) {
        if other.max_concurrent.is_some() {
            self.max_concurrent = other.max_concurrent;
        }
        if other.default_shell.is_some() {
            self.default_shell = other.default_shell;
        }
        if other.grace_period_ms.is_some() {
            self.grace_period_ms = other.grace_period_ms;
        }
        if other.event_capacity.is_some() {
            self.event_capacity = other.event_capacity;
        }
        if other.max_log_lines_per_task.is_some() {
            self.max_log_lines_per_task = other.max_log_lines_per_task;
        }
        if other.validate_cwd.is_some() {
            self.validate_cwd = other.validate_cwd;
        }
        if other.database_path.is_some() {
            self.database_path = other.database_path;
        }
        for pattern in other.extra_destructive_patterns {
            if !self.extra_destructive_patterns.contains(&pattern) {
                self.extra_destructive_patterns.push(pattern);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == Some(0) {
            return Err(Error::Config("maxConcurrent must be at least 1".to_string()));
        }
        if self.event_capacity == Some(0) {
            return Err(Error::Config("eventCapacity must be at least 1".to_string()));
        }
        if self.max_log_lines_per_task == Some(0) {
            return Err(Error::Config(
                "maxLogLinesPerTask must be at least 1 when set".to_string(),
            ));
        }
        if let Some(shell) = &self.default_shell {
            shell
                .parse::<Shell>()
                .map_err(|e| Error::Config(format!("defaultShell: {}", e)))?;
        }
        for pattern in &self.extra_destructive_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid destructive pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    // ========================================================================
    // Resolved values
    // ========================================================================

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms.unwrap_or(DEFAULT_GRACE_PERIOD_MS))
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY)
    }

    pub fn validate_cwd(&self) -> bool {
        self.validate_cwd.unwrap_or(true)
    }

    /// Configured default shell, or the platform default
    pub fn shell(&self) -> Result<Shell> {
        match &self.default_shell {
            Some(name) => name.parse(),
            None => Ok(Shell::platform_default()),
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn with_default_shell(mut self, shell: impl Into<String>) -> Self {
        self.default_shell = Some(shell.into());
        self
    }

    pub fn with_grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = Some(ms);
        self
    }

    pub fn with_max_log_lines_per_task(mut self, lines: usize) -> Self {
        self.max_log_lines_per_task = Some(lines);
        self
    }

    pub fn with_validate_cwd(mut self, validate: bool) -> Self {
        self.validate_cwd = Some(validate);
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}
