//! The `logs` command: reads per-session loop logs.
//!
//! Logs live under `<log_dir>/<session>/<timestamp>.log`; the newest file by
//! modification time is the current one.

use crate::display::{Painter, colors, format_size};
use crate::sessions::validate_session_name;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Parser;
use screenloop_core::ProjectConfig;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

/// Arguments for the logs subcommand.
#[derive(Parser, Debug, Clone)]
pub struct LogsArgs {
    /// Session to show logs for (lists sessions when omitted)
    pub session: Option<String>,

    /// Number of lines to show
    #[arg(short = 'n', long, default_value_t = 50)]
    pub lines: usize,

    /// Follow the most recent log file
    #[arg(short, long)]
    pub tail: bool,

    /// Show all log files with sizes and dates
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

pub fn run(config: &ProjectConfig, args: LogsArgs, use_colors: bool) -> Result<()> {
    let p = Painter::new(use_colors);
    let log_dir = &config.logging.directory;

    if !log_dir.is_dir() {
        println!("{}", p.paint(colors::YELLOW, "No log directory found."));
        return Ok(());
    }

    let Some(session) = args.session.as_deref().filter(|s| !s.is_empty()) else {
        let mut stdout = std::io::stdout().lock();
        return write_session_list(log_dir, &p, &mut stdout);
    };

    let session_dir = session_log_dir(log_dir, session)?;
    if !session_dir.is_dir() {
        bail!("No logs found for session '{session}'.");
    }

    let files = log_files(&session_dir)?;
    let mut stdout = std::io::stdout().lock();

    if args.all {
        if files.is_empty() {
            writeln!(
                stdout,
                "{}",
                p.paint(
                    colors::YELLOW,
                    &format!("No log files found for session '{session}'.")
                )
            )?;
            return Ok(());
        }
        return write_file_table(&files, &mut stdout);
    }

    let Some(latest) = files.first() else {
        writeln!(
            stdout,
            "{}",
            p.paint(
                colors::YELLOW,
                &format!("No log files found for session '{session}'.")
            )
        )?;
        return Ok(());
    };

    if args.tail {
        writeln!(
            stdout,
            "{}",
            p.paint(colors::CYAN, &format!("Tailing: {}", latest.path.display()))
        )?;
        drop(stdout);
        let status = Command::new("tail")
            .arg("-f")
            .arg(&latest.path)
            .status()
            .context("Failed to run tail")?;
        if !status.success() {
            bail!("tail exited with {status}");
        }
        return Ok(());
    }

    let content = fs::read(&latest.path)
        .with_context(|| format!("Failed to read {}", latest.path.display()))?;
    writeln!(
        stdout,
        "{}",
        p.paint(
            colors::CYAN,
            &format!("Last {} lines of: {}", args.lines, latest.path.display())
        )
    )?;
    for line in last_lines(&String::from_utf8_lossy(&content), args.lines) {
        writeln!(stdout, "{line}")?;
    }
    Ok(())
}

/// `<log_dir>/<session>`, refusing names that could leave the log root.
fn session_log_dir(log_dir: &Path, session: &str) -> Result<PathBuf> {
    validate_session_name(session)?;
    Ok(log_dir.join(session))
}

/// `.log` files in `dir`, newest first.
fn log_files(dir: &Path) -> Result<Vec<LogFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "log") {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push(LogFile {
            path,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    // Newest first; names embed the start time, so they break mtime ties
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(files)
}

fn last_lines(content: &str, count: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    lines[lines.len().saturating_sub(count)..].to_vec()
}

fn write_file_table<W: Write>(files: &[LogFile], out: &mut W) -> Result<()> {
    writeln!(out, "{:<36} {:>10} {}", "File", "Size", "Modified")?;
    writeln!(out, "{}", "-".repeat(68))?;
    for file in files {
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified: DateTime<Local> = file.modified.into();
        writeln!(
            out,
            "{:<36} {:>10} {}",
            name,
            format_size(file.size),
            modified.format("%Y-%m-%d %H:%M:%S")
        )?;
    }
    Ok(())
}

/// Lists session log directories, most recently modified first.
fn write_session_list<W: Write>(log_dir: &Path, p: &Painter, out: &mut W) -> Result<()> {
    let mut sessions = Vec::new();
    for entry in
        fs::read_dir(log_dir).with_context(|| format!("Failed to read {}", log_dir.display()))?
    {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let count = log_files(&entry.path())?.len();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        sessions.push((entry.file_name().to_string_lossy().into_owned(), count, modified));
    }

    if sessions.is_empty() {
        writeln!(out, "{}", p.paint(colors::YELLOW, "No session logs found."))?;
        return Ok(());
    }

    sessions.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    for (name, count, _) in sessions {
        writeln!(out, "{name} ({count} log files)")?;
    }
    Ok(())
}
