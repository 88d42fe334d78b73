//! # screenloop
//!
//! Binary entry point for Screenloop.
//!
//! - `screenloop loop` drives the agent through iterations in the foreground
//! - `screenloop start` launches a loop in a detached screen session
//! - `screenloop status | kill | attach | logs` manage launched sessions

mod display;
mod logs;
mod loop_runner;
mod sessions;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use screenloop_core::ProjectConfig;
use std::io::{IsTerminal, stdout};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Screenloop - run a coding agent in resumable loops inside screen sessions
#[derive(Parser, Debug)]
#[command(name = "screenloop", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "screenloop.yml", global = true)]
    config: PathBuf,

    /// Verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the iteration loop in the foreground
    Loop(loop_runner::LoopArgs),

    /// Start a loop in a detached screen session
    Start(sessions::StartArgs),

    /// List tracked sessions
    Status(sessions::StatusArgs),

    /// Kill a session
    Kill(sessions::KillArgs),

    /// Attach to a running session
    Attach(sessions::AttachArgs),

    /// View session logs
    Logs(logs::LogsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            // Usage errors are startup errors: exit 1, never the loop's 2
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let use_colors = cli.color.should_use_colors();

    match cli.command {
        Commands::Loop(args) => {
            let exit_code = loop_runner::run(args, use_colors).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        Commands::Start(args) => {
            let config = load_config(&cli.config)?;
            let exit_code = sessions::start(&config, args, use_colors)?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        Commands::Status(args) => sessions::status(&load_config(&cli.config)?, args, use_colors),
        Commands::Kill(args) => sessions::kill(&load_config(&cli.config)?, args, use_colors),
        Commands::Attach(args) => sessions::attach(&load_config(&cli.config)?, args, use_colors),
        Commands::Logs(args) => logs::run(&load_config(&cli.config)?, args, use_colors),
    }
}

fn load_config(path: &std::path::Path) -> Result<ProjectConfig> {
    ProjectConfig::load(path)
        .and_then(|config| config.with_env_overrides(|key| std::env::var(key).ok()))
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
