//! Session management commands: `start`, `status`, `kill` and `attach`.
//!
//! Sessions are loops running in detached multiplexer sessions, tracked in
//! the project's session registry so later invocations can find them.

use crate::display::{Painter, colors, format_age};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use screenloop_adapters::ScreenMultiplexer;
use screenloop_core::config::resolve_prompt_text;
use screenloop_core::{
    LoopLog, NESTED_SESSION_ENV, ProjectConfig, SessionRecord, SessionRegistry,
};
use screenloop_proto::Multiplexer;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Arguments for the start subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// Session name (letters, digits and hyphens)
    pub name: Option<String>,

    /// Prompt file path or inline prompt text
    #[arg(short, long)]
    pub prompt: String,

    /// Maximum number of iterations (defaults to the configured value)
    #[arg(short = 'n', long)]
    pub iterations: Option<u32>,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Per-invocation spend limit in USD
    #[arg(long)]
    pub budget: Option<String>,

    /// Run every iteration as an independent session
    #[arg(long)]
    pub fresh: bool,

    /// Reuse the session id stored for this name
    #[arg(long)]
    pub resume: bool,

    /// Attach to the session after starting it
    #[arg(long)]
    pub attach: bool,

    /// Run the loop in the foreground instead of a detached session
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the status subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    /// Remove entries whose sessions are no longer alive
    #[arg(long)]
    pub clean: bool,

    /// Print the registry as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the kill subcommand.
#[derive(Parser, Debug, Clone)]
pub struct KillArgs {
    /// Session to kill
    pub session: Option<String>,

    /// Kill every tracked session
    #[arg(long)]
    pub all: bool,

    /// Skip confirmation
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the attach subcommand.
#[derive(Parser, Debug, Clone)]
pub struct AttachArgs {
    /// Session to attach to (defaults to the only running one)
    pub session: Option<String>,
}

fn multiplexer(config: &ProjectConfig) -> ScreenMultiplexer {
    ScreenMultiplexer::new(&config.screen.prefix, &config.screen.shell)
}

fn registry(config: &ProjectConfig) -> SessionRegistry<ScreenMultiplexer> {
    SessionRegistry::new(&config.tracking.file, multiplexer(config))
}

// ─────────────────────────────────────────────────────────────────────────────
// START
// ─────────────────────────────────────────────────────────────────────────────

/// Where a session's prompt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PromptSource {
    /// Path handed to the loop's `--prompt`.
    path: PathBuf,
    /// Recorded in the registry and the session log.
    source: String,
}

/// Launches a loop, detached unless `--once`. Returns the exit code.
pub fn start(config: &ProjectConfig, args: StartArgs, use_colors: bool) -> Result<i32> {
    let p = Painter::new(use_colors);

    if args.fresh && args.resume {
        bail!("--fresh and --resume cannot be used together");
    }

    let name = match args.name.as_deref() {
        Some(name) => name.to_string(),
        None => suggested_name(&args.prompt)
            .context("A session name is required when the prompt is not a file")?,
    };
    validate_session_name(&name)?;

    let registry = registry(config);
    let prompt = resolve_prompt_source(&args.prompt, &name, &config.logging.directory)?;
    let session_id = resolve_session_id(&registry, &name, args.resume, &p)?;
    let iterations = args
        .iterations
        .unwrap_or(config.loop_settings.default_iterations);
    if iterations == 0 {
        bail!("--iterations must be at least 1");
    }
    let model = args
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| config.loop_settings.model.clone().filter(|m| !m.is_empty()));
    let working_dir = std::env::current_dir().context("Failed to resolve working directory")?;

    let log_path = LoopLog::default_path(&config.logging.directory, &name, Utc::now());
    let mut log = LoopLog::open(&log_path)
        .with_context(|| format!("Failed to open session log {}", log_path.display()))?;
    log.info(&format!("Session: {name}"));
    log.info(&format!("Prompt source: {}", prompt.source));
    log.info(&format!("Session ID: {session_id}"));
    log.info(&format!("Iterations: {iterations}"));
    log.info(&format!("Model: {}", model.as_deref().unwrap_or("default")));
    log.info(&format!("Mode: {}", if args.fresh { "fresh" } else { "resume" }));
    log.info(&format!("Working dir: {}", working_dir.display()));

    let program = std::env::current_exe().context("Failed to locate the screenloop binary")?;
    let loop_command = build_loop_command(&LoopCommand {
        program: &program,
        prompt: &prompt.path,
        name: &name,
        iterations,
        permission_mode: &config.loop_settings.permission_mode,
        session_id: &session_id,
        log_path: &log_path,
        model: model.as_deref(),
        budget: args.budget.as_deref().filter(|b| !b.is_empty()),
        fresh: args.fresh,
    });
    log.debug(&format!("Loop command: {loop_command}"));
    log.flush();

    let env_vars = config.loop_env_vars();

    if args.once {
        println!(
            "{}",
            p.paint(colors::CYAN, &format!("Running loop '{name}' in the foreground..."))
        );
        let status = Command::new("bash")
            .arg("-c")
            .arg(&loop_command)
            .current_dir(&working_dir)
            .env_remove(NESTED_SESSION_ENV)
            .envs(env_vars.iter().map(|(k, v)| (*k, v.as_str())))
            .status()
            .context("Failed to run the loop")?;
        return Ok(status.code().unwrap_or(1));
    }

    if registry.is_running(&name)? {
        bail!("Session '{name}' is already running.");
    }

    println!(
        "{}",
        p.paint(colors::CYAN, &format!("Starting session '{name}'..."))
    );
    let screen_command = build_screen_command(&env_vars, &working_dir, &loop_command);
    debug!("Screen command: {}", screen_command);

    let mux = registry.multiplexer();
    mux.spawn(&name, &screen_command, &working_dir)
        .with_context(|| format!("Failed to start session '{name}'"))?;

    registry
        .track(
            &name,
            SessionRecord {
                name: name.clone(),
                prompt_source: prompt.source.clone(),
                working_path: working_dir.clone(),
                session_id: session_id.clone(),
                model: model.clone(),
                iterations,
                screen_name: mux.full_name(&name),
                started_at: None,
            },
        )
        .context("Failed to record session")?;

    println!(
        "{}",
        p.bold(colors::GREEN, &format!("Session '{name}' started."))
    );
    println!("  • Screen: {}", mux.full_name(&name));
    println!("  • Working dir: {}", working_dir.display());
    println!("  • Iterations: {iterations}");
    println!("  • Session ID: {session_id}");

    if args.attach {
        println!("{}", p.paint(colors::CYAN, "Attaching to screen session..."));
        run_attach(&mux.attach_command(&name))?;
    }

    Ok(0)
}

/// Rejects names that are not non-empty runs of `[A-Za-z0-9-]`.
pub(crate) fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        bail!("Name must be alphanumeric with hyphens only.");
    }
    Ok(())
}

/// A name derived from a prompt file's stem, when the prompt is a file.
fn suggested_name(prompt: &str) -> Option<String> {
    let path = Path::new(prompt);
    if !path.is_file() {
        return None;
    }
    let stem = path.file_stem()?.to_string_lossy();
    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let name = name.trim_matches('-').to_string();
    (!name.is_empty()).then_some(name)
}

/// Keeps an existing prompt file as is; writes inline text to
/// `<log_dir>/prompt-<name>.md`.
fn resolve_prompt_source(prompt: &str, name: &str, log_dir: &Path) -> Result<PromptSource> {
    let path = Path::new(prompt);
    if !prompt.is_empty() && path.is_file() {
        // Validates the file has content before anything is launched
        resolve_prompt_text(prompt)?;
        return Ok(PromptSource {
            path: path.to_path_buf(),
            source: prompt.to_string(),
        });
    }

    let text = resolve_prompt_text(prompt)?;
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;
    let file = log_dir.join(format!("prompt-{name}.md"));
    std::fs::write(&file, text)
        .with_context(|| format!("Failed to write prompt file {}", file.display()))?;
    Ok(PromptSource {
        path: file,
        source: "prompt".to_string(),
    })
}

fn resolve_session_id<M: Multiplexer>(
    registry: &SessionRegistry<M>,
    name: &str,
    resume: bool,
    p: &Painter,
) -> Result<String> {
    if resume {
        match registry.get(name)? {
            Some(record) if !record.session_id.is_empty() => return Ok(record.session_id),
            _ => println!(
                "{}",
                p.paint(
                    colors::YELLOW,
                    &format!("No stored session ID for '{name}', starting fresh.")
                )
            ),
        }
    }
    Ok(uuid::Uuid::new_v4().to_string())
}

/// Inputs for the detached `screenloop loop` command line.
struct LoopCommand<'a> {
    program: &'a Path,
    prompt: &'a Path,
    name: &'a str,
    iterations: u32,
    permission_mode: &'a str,
    session_id: &'a str,
    log_path: &'a Path,
    model: Option<&'a str>,
    budget: Option<&'a str>,
    fresh: bool,
}

fn build_loop_command(cmd: &LoopCommand<'_>) -> String {
    let mut parts = vec![
        shell_escape(&cmd.program.display().to_string()),
        "loop".to_string(),
        "--prompt".to_string(),
        shell_escape(&cmd.prompt.display().to_string()),
        "--name".to_string(),
        shell_escape(cmd.name),
        "--iterations".to_string(),
        cmd.iterations.to_string(),
        "--permission-mode".to_string(),
        shell_escape(cmd.permission_mode),
        "--session-id".to_string(),
        shell_escape(cmd.session_id),
        "--log-path".to_string(),
        shell_escape(&cmd.log_path.display().to_string()),
    ];
    if let Some(model) = cmd.model {
        parts.push("--model".to_string());
        parts.push(shell_escape(model));
    }
    if let Some(budget) = cmd.budget {
        parts.push("--budget".to_string());
        parts.push(shell_escape(budget));
    }
    if cmd.fresh {
        parts.push("--fresh".to_string());
    }
    parts.join(" ")
}

/// `unset CLAUDECODE && export K=V && ... && cd <dir> && <loop command>`
fn build_screen_command(env_vars: &[(&str, String)], dir: &Path, loop_command: &str) -> String {
    let mut parts = vec![format!("unset {NESTED_SESSION_ENV}")];
    parts.extend(
        env_vars
            .iter()
            .map(|(key, value)| format!("export {key}={}", shell_escape(value))),
    );
    parts.push(format!("cd {}", shell_escape(&dir.display().to_string())));
    parts.push(loop_command.to_string());
    parts.join(" && ")
}

/// Quotes `s` for a POSIX shell, leaving plain words untouched.
fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':'))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// STATUS
// ─────────────────────────────────────────────────────────────────────────────

/// Lists tracked sessions, optionally cleaning dead entries first.
pub fn status(config: &ProjectConfig, args: StatusArgs, use_colors: bool) -> Result<()> {
    let registry = registry(config);
    let mut stdout = io::stdout().lock();
    write_status(&registry, &args, &Painter::new(use_colors), &mut stdout)
}

fn write_status<M: Multiplexer, W: Write>(
    registry: &SessionRegistry<M>,
    args: &StatusArgs,
    p: &Painter,
    out: &mut W,
) -> Result<()> {
    if args.clean {
        let removed = registry.clean().context("Failed to clean session registry")?;
        if removed.is_empty() {
            writeln!(out, "No dead entries found.")?;
        } else {
            writeln!(
                out,
                "Cleaned {} dead entries: {}",
                removed.len(),
                removed.join(", ")
            )?;
        }
    }

    let records = registry.all().context("Failed to read session registry")?;
    if records.is_empty() {
        writeln!(out, "No sessions tracked.")?;
        return Ok(());
    }

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }

    let now = Utc::now();
    writeln!(
        out,
        "{:<20} {:<8} {:<32} {:<8} {:<16} {:<8} {}",
        "Name", "Status", "Path", "Session", "Model", "Duration", "Screen"
    )?;
    writeln!(out, "{}", "-".repeat(110))?;
    for (key, record) in &records {
        let running = !record.name.is_empty() && registry.multiplexer().is_alive(&record.name);
        // Pad before painting so escape codes don't skew the columns
        let status = if running {
            p.paint(colors::GREEN, &format!("{:<8}", "running"))
        } else {
            p.paint(colors::RED, &format!("{:<8}", "stopped"))
        };
        let session: String = record.session_id.chars().take(8).collect();
        let duration = record
            .started_at
            .map_or_else(|| "-".to_string(), |t| format_age((now - t).num_seconds()));
        writeln!(
            out,
            "{:<20} {} {:<32} {:<8} {:<16} {:<8} {}",
            key,
            status,
            record.working_path.display(),
            session,
            record.model.as_deref().unwrap_or("default"),
            duration,
            record.screen_name
        )?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// KILL
// ─────────────────────────────────────────────────────────────────────────────

/// Terminates sessions and removes them from the registry.
pub fn kill(config: &ProjectConfig, args: KillArgs, use_colors: bool) -> Result<()> {
    let registry = registry(config);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout().lock();
    kill_sessions(
        &registry,
        &args,
        &Painter::new(use_colors),
        &mut input,
        &mut stdout,
    )
}

fn kill_sessions<M: Multiplexer, R: BufRead, W: Write>(
    registry: &SessionRegistry<M>,
    args: &KillArgs,
    p: &Painter,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    let records = registry.all().context("Failed to read session registry")?;

    if args.all {
        if records.is_empty() {
            writeln!(out, "No sessions to kill.")?;
            return Ok(());
        }
        if !args.force
            && !confirm(&format!("Kill all {} sessions?", records.len()), input, out)?
        {
            writeln!(out, "Cancelled.")?;
            return Ok(());
        }
        for (key, record) in &records {
            let target = if record.name.is_empty() { key } else { &record.name };
            if !registry.multiplexer().terminate(target) {
                debug!("Session {} was not alive", target);
            }
            registry.untrack(key)?;
            writeln!(out, "{}", p.paint(colors::GREEN, &format!("Killed '{key}'.")))?;
        }
        return Ok(());
    }

    let session = match args.session.as_deref() {
        Some(session) => session.to_string(),
        None => match records.len() {
            0 => bail!("No sessions tracked."),
            1 => records.keys().next().cloned().unwrap_or_default(),
            _ => bail!(
                "Multiple sessions tracked, name one of: {}",
                records.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        },
    };

    if !args.force && !confirm(&format!("Kill session '{session}'?"), input, out)? {
        writeln!(out, "Cancelled.")?;
        return Ok(());
    }

    let target = records
        .get(&session)
        .map(|r| r.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| session.clone());
    if !registry.multiplexer().terminate(&target) {
        warn!("Session {} was not running", target);
    }
    registry.untrack(&session)?;
    writeln!(
        out,
        "{}",
        p.paint(colors::GREEN, &format!("Session '{session}' killed."))
    )?;
    Ok(())
}

/// Asks a yes/no question; anything but `y`/`yes` (including EOF) is no.
fn confirm<R: BufRead, W: Write>(question: &str, input: &mut R, out: &mut W) -> Result<bool> {
    write!(out, "{question} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read input")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// ATTACH
// ─────────────────────────────────────────────────────────────────────────────

/// Attaches the terminal to a running session.
pub fn attach(config: &ProjectConfig, args: AttachArgs, use_colors: bool) -> Result<()> {
    let registry = registry(config);
    let p = Painter::new(use_colors);

    let session = match args.session {
        Some(session) => session,
        None => {
            let running = registry.running().context("Failed to read session registry")?;
            let session = pick_attach_target(&running)?;
            println!(
                "{}",
                p.paint(colors::CYAN, &format!("Auto-selecting '{session}'."))
            );
            session
        }
    };

    let mux = registry.multiplexer();
    if !mux.is_alive(&session) {
        bail!("Session '{session}' is not running.");
    }
    run_attach(&mux.attach_command(&session))
}

fn pick_attach_target(running: &BTreeMap<String, SessionRecord>) -> Result<String> {
    let mut keys = running.keys();
    match (keys.next(), keys.next()) {
        (None, _) => bail!("No running sessions found."),
        (Some(only), None) => Ok(only.clone()),
        (Some(_), Some(_)) => bail!(
            "Multiple sessions running, name one of: {}",
            running.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn run_attach(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("Empty attach command");
    };
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}
