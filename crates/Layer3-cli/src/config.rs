//! `deskrun config` - show or edit engine.json

use clap::Args;
use deskrun_foundation::{EngineConfig, JsonStore, ENGINE_CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Edit the global file instead of the project one (`./.deskrun/`)
    #[arg(long)]
    global: bool,

    /// Maximum tasks running at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Default shell (sh, bash, zsh, fish, cmd, powershell, pwsh or a path)
    #[arg(long)]
    shell: Option<String>,

    /// Wait between graceful termination and kill, in milliseconds
    #[arg(long)]
    grace_period_ms: Option<u64>,

    /// Lines kept per task before the oldest are dropped
    #[arg(long)]
    max_log_lines: Option<usize>,

    /// SQLite file to record tasks in
    #[arg(long)]
    db: Option<PathBuf>,

    /// Extra destructive-command regex (repeatable)
    #[arg(long = "destructive-pattern")]
    destructive_patterns: Vec<String>,
}

impl ConfigArgs {
    /// Settings named on the command line
    fn updates(&self) -> Option<EngineConfig> {
        let updates = EngineConfig {
            max_concurrent: self.max_concurrent,
            default_shell: self.shell.clone(),
            grace_period_ms: self.grace_period_ms,
            max_log_lines_per_task: self.max_log_lines,
            database_path: self.db.clone(),
            extra_destructive_patterns: self.destructive_patterns.clone(),
            ..Default::default()
        };
        (updates != EngineConfig::default()).then_some(updates)
    }
}

/// Print the effective config, or write the given settings into one layer
pub fn run(args: ConfigArgs, effective: &EngineConfig) -> anyhow::Result<ExitCode> {
    let Some(updates) = args.updates() else {
        println!("{}", serde_json::to_string_pretty(effective)?);
        return Ok(ExitCode::SUCCESS);
    };

    let store = if args.global {
        JsonStore::global()?
    } else {
        JsonStore::current_project()?
    };
    update_layer(&store, updates)?;
    println!("Updated {}", store.file_path(ENGINE_CONFIG_FILE).display());
    Ok(ExitCode::SUCCESS)
}

/// Merge `updates` into the layer file; nothing is written if the result is invalid
fn update_layer(store: &JsonStore, updates: EngineConfig) -> anyhow::Result<EngineConfig> {
    let mut layer = EngineConfig::load_layer(store)?;
    layer.merge(updates);
    layer.save_to(store)?;
    Ok(layer)
}
