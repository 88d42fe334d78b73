//! Process runner that replays scripted agent runs.

use async_trait::async_trait;
use screenloop_proto::{AgentInvocation, OutputSink, ProcessRunner, RunOutcome, RunnerError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// One scripted agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRun {
    /// Emits output and exits with `exit_code` (`None` = killed by signal).
    Exit {
        stdout: Vec<String>,
        stderr: Vec<u8>,
        exit_code: Option<i32>,
    },
    /// Fails before producing any output.
    SpawnError,
}

impl ScriptedRun {
    pub fn exit(code: i32) -> Self {
        ScriptedRun::Exit {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Some(code),
        }
    }

    pub fn killed() -> Self {
        ScriptedRun::Exit {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }

    pub fn spawn_error() -> Self {
        ScriptedRun::SpawnError
    }

    /// Adds a raw stdout line.
    pub fn line(mut self, line: impl Into<String>) -> Self {
        if let ScriptedRun::Exit { stdout, .. } = &mut self {
            stdout.push(line.into());
        }
        self
    }

    /// Adds an assistant message carrying one text block.
    pub fn text(self, text: &str) -> Self {
        let line = serde_json::json!({
            "type": "assistant",
            "message": { "content": [{ "type": "text", "text": text }] }
        });
        self.line(line.to_string())
    }

    /// Adds a result record.
    pub fn result(self, result: &str) -> Self {
        let line = serde_json::json!({ "type": "result", "result": result });
        self.line(line.to_string())
    }

    pub fn stderr(mut self, bytes: &[u8]) -> Self {
        if let ScriptedRun::Exit { stderr, .. } = &mut self {
            stderr.extend_from_slice(bytes);
        }
        self
    }
}

/// Replays [`ScriptedRun`]s in order and records every invocation.
///
/// Clones share state, so a test can keep a handle after moving the runner
/// into a driver. Runs past the end of the script exit 0 with no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<ScriptedRun>,
    invocations: Vec<AgentInvocation>,
}

impl ScriptedRunner {
    pub fn new(runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script: runs.into_iter().collect(),
                invocations: Vec::new(),
            })),
        }
    }

    /// Every invocation received so far, in order.
    pub fn invocations(&self) -> Vec<AgentInvocation> {
        self.lock().invocations.clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.lock().invocations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &AgentInvocation,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<RunOutcome, RunnerError> {
        let next = {
            let mut state = self.lock();
            state.invocations.push(invocation.clone());
            state.script.pop_front()
        };

        match next.unwrap_or_else(|| ScriptedRun::exit(0)) {
            ScriptedRun::Exit {
                stdout,
                stderr,
                exit_code,
            } => {
                for line in &stdout {
                    sink.on_stdout_line(line);
                }
                if !stderr.is_empty() {
                    sink.on_stderr(&stderr);
                }
                Ok(RunOutcome { exit_code })
            }
            ScriptedRun::SpawnError => Err(RunnerError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
        }
    }
}
