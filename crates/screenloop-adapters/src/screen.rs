//! GNU screen backend for detached loop sessions.

use regex::Regex;
use screenloop_proto::{Multiplexer, MultiplexerError};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

/// One session line from `screen -ls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSession {
    pub pid: u32,
    /// Full session name, prefix included.
    pub name: String,
    /// Date and attach state as printed by screen.
    pub state: String,
}

/// Parses `screen -ls` output, keeping sessions named `<prefix>-...`.
pub fn parse_screen_list(output: &str, prefix: &str) -> Vec<ScreenSession> {
    static SESSION_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = SESSION_LINE
        .get_or_init(|| Regex::new(r"\t(\d+)\.(\S+)\t\((.+?)\)").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let wanted = format!("{prefix}-");
    re.captures_iter(output)
        .filter(|caps| caps[2].starts_with(&wanted))
        .filter_map(|caps| {
            Some(ScreenSession {
                pid: caps[1].parse().ok()?,
                name: caps[2].to_string(),
                state: caps[3].to_string(),
            })
        })
        .collect()
}

/// Hosts loops in detached `screen` sessions named `<prefix>-<name>`.
#[derive(Debug, Clone)]
pub struct ScreenMultiplexer {
    prefix: String,
    shell: String,
    program: String,
}

impl ScreenMultiplexer {
    pub fn new(prefix: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            shell: shell.into(),
            program: "screen".to_string(),
        }
    }

    /// Uses a different screen executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sessions under this prefix. A missing screen binary means none.
    pub fn list_sessions(&self) -> Vec<ScreenSession> {
        // screen -ls exits 1 when sessions exist, so the status is ignored
        match Command::new(&self.program).arg("-ls").output() {
            Ok(output) => parse_screen_list(&String::from_utf8_lossy(&output.stdout), &self.prefix),
            Err(e) => {
                debug!("Could not run `{} -ls`: {}", self.program, e);
                Vec::new()
            }
        }
    }
}

impl Multiplexer for ScreenMultiplexer {
    fn is_alive(&self, name: &str) -> bool {
        let full = self.full_name(name);
        self.list_sessions().iter().any(|s| s.name == full)
    }

    fn spawn(&self, name: &str, command: &str, dir: &Path) -> Result<(), MultiplexerError> {
        let full = self.full_name(name);
        if self.is_alive(name) {
            return Err(MultiplexerError::AlreadyRunning(full));
        }

        debug!("Starting screen session {} in {}", full, dir.display());
        let output = Command::new(&self.program)
            .args(["-dmS", full.as_str(), "-s", self.shell.as_str(), "bash", "-c", command])
            .current_dir(dir)
            .output()?;

        if !output.status.success() {
            return Err(MultiplexerError::StartFailed {
                name: full,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn terminate(&self, name: &str) -> bool {
        if !self.is_alive(name) {
            return false;
        }
        let full = self.full_name(name);
        match Command::new(&self.program)
            .args(["-S", full.as_str(), "-X", "quit"])
            .output()
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("Failed to quit screen session {}: {}", full, e);
                false
            }
        }
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }

    fn attach_command(&self, name: &str) -> Vec<String> {
        vec![self.program.clone(), "-r".to_string(), self.full_name(name)]
    }
}
