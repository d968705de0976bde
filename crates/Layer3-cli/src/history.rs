//! `deskrun history` - list tasks recorded in a database

use anyhow::Context;
use clap::Args;
use deskrun_foundation::{EngineConfig, RecordStore, Storage};
use deskrun_task::{Task, TaskLogLine};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// SQLite file written by `deskrun run --db` (default: databasePath from config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Only tasks of this thread
    #[arg(long)]
    thread: Option<String>,

    /// Include captured output
    #[arg(long)]
    logs: bool,

    /// Print tasks as JSON lines
    #[arg(long)]
    json: bool,
}

pub fn show(args: HistoryArgs, config: &EngineConfig) -> anyhow::Result<ExitCode> {
    let path = args
        .db
        .clone()
        .or_else(|| config.database_path.clone())
        .context("No database given (use --db or set databasePath in engine.json)")?;
    if !path.exists() {
        anyhow::bail!("Database {} does not exist", path.display());
    }

    let storage = Storage::open(&path)?;
    let records = match &args.thread {
        Some(thread) => storage.load_tasks_for_thread(thread)?,
        None => storage.load_tasks()?,
    };

    if records.is_empty() {
        println!("No tasks found.");
        return Ok(ExitCode::SUCCESS);
    }

    if !args.json {
        println!(
            "{:<10} {:<11} {:<6} {:<12} {:<20} {}",
            "ID", "STATUS", "EXIT", "THREAD", "CREATED", "COMMAND"
        );
        println!("{}", "-".repeat(80));
    }

    for record in records {
        let task = Task::from_record(record)?;
        let logs = if args.logs {
            storage
                .load_logs(&task.id.to_string())?
                .into_iter()
                .map(TaskLogLine::from_record)
                .collect::<deskrun_foundation::Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        if args.json {
            let mut value = serde_json::to_value(&task)?;
            if args.logs {
                value["logs"] = serde_json::to_value(&logs)?;
            }
            println!("{}", value);
            continue;
        }

        let exit = task
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<11} {:<6} {:<12} {:<20} {}",
            task.id.short(),
            format!("{} {}", task.status.symbol(), task.status),
            exit,
            truncate(&task.thread_id, 12),
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.command
        );
        for line in logs {
            println!("    {:<6} {}", line.stream, line.line);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Truncate a string for display
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
