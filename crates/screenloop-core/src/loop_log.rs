//! Per-invocation loop log.
//!
//! One append-only file per loop run. Raw agent output is written verbatim;
//! diagnostics are `[<timestamp>] [LEVEL] message` lines; every run ends with
//! a session summary block.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors opening the loop log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary values written when a loop terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSummary<'a> {
    pub reason: &'a str,
    pub iteration: u32,
    pub max_iterations: u32,
    pub consecutive_failures: u32,
}

/// Append-only log file owned by one loop invocation.
#[derive(Debug)]
pub struct LoopLog {
    path: PathBuf,
    file: File,
    write_failed: bool,
}

impl LoopLog {
    /// Default location: `<log_dir>/<name>/<timestamp>.log`.
    pub fn default_path(log_dir: &Path, name: &str, now: DateTime<Utc>) -> PathBuf {
        let stamp = now
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        log_dir.join(name).join(format!("{stamp}.log"))
    }

    /// Opens `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            write_failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one raw line of agent output.
    pub fn raw_line(&mut self, line: &str) {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write(&buf);
    }

    /// Writes raw stderr bytes unchanged.
    pub fn raw_bytes(&mut self, bytes: &[u8]) {
        self.write(bytes);
    }

    pub fn debug(&mut self, message: &str) {
        self.leveled("DEBUG", message);
    }

    pub fn info(&mut self, message: &str) {
        self.leveled("INFO", message);
    }

    pub fn warn(&mut self, message: &str) {
        self.leveled("WARN", message);
    }

    pub fn error(&mut self, message: &str) {
        self.leveled("ERROR", message);
    }

    /// Writes the termination summary block.
    pub fn summary(&mut self, summary: &LogSummary<'_>) {
        let block = format!(
            "\n=== Session Summary ===\n\
             Reason: {}\n\
             Iterations: {}/{}\n\
             Consecutive failures: {}\n\
             Timestamp: {}\n\
             ========================\n",
            summary.reason,
            summary.iteration,
            summary.max_iterations,
            summary.consecutive_failures,
            timestamp(),
        );
        self.write(block.as_bytes());
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.file.flush() {
            tracing::warn!("Failed to flush loop log {}: {}", self.path.display(), e);
        }
    }

    fn leveled(&mut self, level: &str, message: &str) {
        let line = format!("[{}] [{}] {}\n", timestamp(), level, message);
        self.write(line.as_bytes());
    }

    // A full disk must not stop the loop; report the first failure only.
    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.file.write_all(bytes) {
            if !self.write_failed {
                self.write_failed = true;
                tracing::warn!("Failed to write loop log {}: {}", self.path.display(), e);
            }
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
