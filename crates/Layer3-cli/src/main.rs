//! deskrun CLI - Main entry point

mod config;
mod history;
mod run;

use clap::{Parser, Subcommand};
use deskrun_foundation::EngineConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// deskrun - run shell commands as tracked, cancellable tasks
#[derive(Parser, Debug)]
#[command(name = "deskrun")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Engine config file (default: global + project engine.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run commands and stream their output
    Run(run::RunArgs),

    /// Show tasks recorded in a database
    History(history::HistoryArgs),

    /// Show the effective engine config, or set values in engine.json
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries task output
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Run(run_args) => run::run(run_args, config).await,
        Command::History(history_args) => history::show(history_args, &config),
        Command::Config(config_args) => config::run(config_args, &config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_file(path)?,
        None => EngineConfig::load()?,
    };
    tracing::debug!("Engine config: {:?}", config);
    Ok(config)
}
