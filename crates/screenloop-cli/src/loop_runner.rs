//! The `loop` command: drives the agent in the foreground.

use crate::display::ConsoleObserver;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use screenloop_adapters::CliProcessRunner;
use screenloop_core::config::{DEFAULT_ITERATIONS, DEFAULT_PERMISSION_MODE};
use screenloop_core::{IterationConfig, LoopDriver, LoopEnv, LoopLog, LoopOptions, record_fatal};
use std::path::PathBuf;
use tracing::info;

/// Arguments for the loop subcommand.
#[derive(Parser, Debug, Clone)]
pub struct LoopArgs {
    /// Prompt file path or inline prompt text
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Maximum number of iterations
    #[arg(short = 'n', long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u32,

    /// Loop name, used for the default log directory
    #[arg(long, default_value = "loop")]
    pub name: String,

    /// Permission mode passed to the agent
    #[arg(long, default_value = DEFAULT_PERMISSION_MODE)]
    pub permission_mode: String,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Agent session to create and resume
    #[arg(long)]
    pub session_id: Option<String>,

    /// Per-invocation spend limit in USD
    #[arg(long)]
    pub budget: Option<String>,

    /// Run every iteration as an independent session
    #[arg(long)]
    pub fresh: bool,

    /// Write the loop log here instead of the default location
    #[arg(long)]
    pub log_path: Option<PathBuf>,
}

impl From<LoopArgs> for LoopOptions {
    fn from(args: LoopArgs) -> Self {
        Self {
            name: args.name,
            prompt: args.prompt,
            iterations: args.iterations,
            permission_mode: args.permission_mode,
            model: args.model,
            session_id: args.session_id,
            budget: args.budget,
            fresh: args.fresh,
            log_path: args.log_path,
        }
    }
}

/// Runs the loop and returns the process exit code.
pub async fn run(args: LoopArgs, use_colors: bool) -> Result<i32> {
    let env = LoopEnv::from_env().context("Invalid loop environment")?;

    let log_path = args
        .log_path
        .clone()
        .unwrap_or_else(|| LoopLog::default_path(&env.log_dir, &args.name, Utc::now()));
    let mut log = LoopLog::open(&log_path)
        .with_context(|| format!("Failed to open loop log {}", log_path.display()))?;

    let max_iterations = args.iterations;
    let config = match IterationConfig::resolve(args.into(), &env) {
        Ok(config) => config,
        Err(e) => {
            record_fatal(&mut log, &format!("Startup error: {e}"), max_iterations);
            return Err(e).context("Invalid loop configuration");
        }
    };

    info!(name = %config.name, log = %log_path.display(), "Starting loop");
    let mut driver = LoopDriver::new(
        config,
        CliProcessRunner::new(),
        ConsoleObserver::new(use_colors),
        log,
    );
    let outcome = driver.run().await;
    Ok(outcome.exit_code())
}
