//! `deskrun run` - submit commands and stream their events

use anyhow::Context;
use clap::Args;
use deskrun_foundation::{EngineConfig, Error, ExecutionPolicy, InMemoryThreadDirectory, Storage};
use deskrun_task::{
    LogStream, SubmitRequest, TaskEvent, TaskId, TaskManager, TaskManagerConfig, TaskStatus,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Commands to run, one task each, submitted in order
    #[arg(required = true)]
    commands: Vec<String>,

    /// Thread the tasks belong to
    #[arg(long, default_value = "cli")]
    thread: String,

    /// Working directory (default: current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Shell to run commands with (sh, bash, zsh, fish, cmd, powershell, pwsh or a path)
    #[arg(long)]
    shell: Option<String>,

    /// Thread policy: safe, normal or danger-confirm
    #[arg(long, default_value = "normal")]
    policy: String,

    /// Confirm destructive commands on a danger-confirm thread
    #[arg(long)]
    confirm: bool,

    /// Maximum tasks running at once
    #[arg(short = 'j', long)]
    max_concurrent: Option<usize>,

    /// Per-task time limit in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// SQLite file to record tasks in
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

pub async fn run(args: RunArgs, mut config: EngineConfig) -> anyhow::Result<ExitCode> {
    // Flags override files
    if let Some(limit) = args.max_concurrent {
        config.max_concurrent = Some(limit);
    }
    if let Some(shell) = &args.shell {
        config.default_shell = Some(shell.clone());
    }
    if let Some(db) = &args.db {
        config.database_path = Some(db.clone());
    }

    let policy: ExecutionPolicy = args.policy.parse()?;
    let timeout = match args.timeout {
        Some(secs) if secs > 0.0 && secs.is_finite() => Some(Duration::from_secs_f64(secs)),
        Some(secs) => anyhow::bail!("--timeout must be a positive number of seconds, got {}", secs),
        None => None,
    };
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot get current directory")?,
    };
    let cwd = cwd
        .canonicalize()
        .with_context(|| format!("Invalid working directory {}", cwd.display()))?;

    let threads = Arc::new(InMemoryThreadDirectory::new().with_thread(args.thread.clone(), policy));
    let mut builder = TaskManager::builder(TaskManagerConfig::from_engine_config(&config)?, threads);
    if let Some(path) = &config.database_path {
        builder = builder.with_store(Arc::new(Storage::open(path)?));
    }
    let manager = builder.build()?;
    if config.database_path.is_some() {
        manager.restore()?;
    }

    let mut events = manager.subscribe();
    let mut outstanding = HashSet::new();
    let mut submitted = Vec::new();
    let mut rejected = 0usize;

    for command in &args.commands {
        let mut request =
            SubmitRequest::new(args.thread.clone(), command.clone(), cwd.clone()).confirmed(args.confirm);
        if let Some(limit) = timeout {
            request = request.with_timeout(limit);
        }

        match manager.submit_task(request).await {
            Ok(task) => {
                outstanding.insert(task.id);
                submitted.push(task.id);
            }
            Err(e) => {
                rejected += 1;
                eprintln!("✗ {}: {}", command, e);
                if matches!(e, Error::PermissionRequired { .. }) {
                    eprintln!("  (rerun with --confirm to allow it)");
                }
            }
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while !outstanding.is_empty() {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if event.thread_id() != args.thread {
                        continue;
                    }
                    print_event(&event, args.json);
                    if event.terminal_status().is_some() {
                        outstanding.remove(&event.task_id());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} events", skipped);
                    outstanding.retain(|id| {
                        manager.get_task(id).map(|t| !t.is_terminal()).unwrap_or(false)
                    });
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let cancelled = manager.cancel_all();
                info!("Interrupted, cancelling {} tasks", cancelled);
            }
        }
    }

    manager.flush().await;

    let summary = RunSummary::collect(&manager, &submitted, rejected, interrupted);
    if !args.json {
        eprintln!("{}", summary);
    }
    Ok(summary.exit_code())
}

fn print_event(event: &TaskEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
        return;
    }

    match event {
        TaskEvent::Log {
            task_id,
            stream: LogStream::Stdout,
            line,
            ..
        } => println!("[{}] {}", task_id.short(), line),
        TaskEvent::Log { task_id, line, .. } => eprintln!("[{}] {}", task_id.short(), line),
        TaskEvent::Status {
            task_id,
            status,
            exit_code,
            ..
        } => match exit_code {
            Some(code) => println!("[{}] {} {} (exit {})", task_id.short(), status.symbol(), status, code),
            None => println!("[{}] {} {}", task_id.short(), status.symbol(), status),
        },
    }
}

/// How a `run` ended, for the closing line and the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    succeeded: usize,
    not_succeeded: usize,
    rejected: usize,
    interrupted: bool,
}

impl RunSummary {
    fn collect(
        manager: &TaskManager,
        submitted: &[TaskId],
        rejected: usize,
        interrupted: bool,
    ) -> Self {
        let statuses: Vec<_> = submitted
            .iter()
            .filter_map(|id| manager.get_task(id).map(|t| t.status))
            .collect();
        Self::from_statuses(&statuses, rejected, interrupted)
    }

    fn from_statuses(statuses: &[TaskStatus], rejected: usize, interrupted: bool) -> Self {
        let succeeded = statuses.iter().filter(|s| **s == TaskStatus::Succeeded).count();
        Self {
            succeeded,
            not_succeeded: statuses.len() - succeeded,
            rejected,
            interrupted,
        }
    }

    /// Every command was admitted and succeeded, and nobody pressed Ctrl-C
    fn success(&self) -> bool {
        self.not_succeeded == 0 && self.rejected == 0 && !self.interrupted
    }

    fn exit_code(&self) -> ExitCode {
        if self.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} task(s): {} succeeded, {} not succeeded",
            self.succeeded + self.not_succeeded,
            self.succeeded,
            self.not_succeeded
        )?;
        if self.rejected > 0 {
            write!(f, ", {} rejected", self.rejected)?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}
