//! Agent process execution seam.

use crate::error::RunnerError;
use async_trait::async_trait;
use std::path::PathBuf;

/// One fully resolved agent process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Executable to spawn.
    pub program: String,
    /// Argument vector, excluding the program itself.
    pub args: Vec<String>,
    /// Environment variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub working_dir: Option<PathBuf>,
}

impl AgentInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env_remove: Vec::new(),
            working_dir: None,
        }
    }

    /// Marks an inherited environment variable to be unset for the child.
    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }
}

/// How an agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, or `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl RunOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
        }
    }

    /// True only for a clean zero exit.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Receives agent output while the process runs.
pub trait OutputSink {
    /// Called once per stdout line, without the trailing newline.
    fn on_stdout_line(&mut self, line: &str);

    /// Called with raw stderr bytes as they arrive.
    fn on_stderr(&mut self, chunk: &[u8]);
}

/// Spawns agent processes and streams their output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion, feeding output to `sink`.
    ///
    /// Resolves once stdout and stderr are drained and the process exited.
    async fn run(
        &self,
        invocation: &AgentInvocation,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<RunOutcome, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_zero_exit_is_success() {
        assert!(RunOutcome::exited(0).success());
        assert!(!RunOutcome::exited(1).success());
        assert!(!RunOutcome { exit_code: None }.success());
    }

    #[test]
    fn test_without_env_accumulates() {
        let invocation = AgentInvocation::new("claude", vec!["-p".into()])
            .without_env("CLAUDECODE")
            .without_env("OTHER");

        assert_eq!(invocation.env_remove, vec!["CLAUDECODE", "OTHER"]);
        assert!(invocation.working_dir.is_none());
    }
}
