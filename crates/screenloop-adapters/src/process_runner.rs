//! Agent process runner backed by `tokio::process`.

use async_trait::async_trait;
use screenloop_proto::{AgentInvocation, OutputSink, ProcessRunner, RunOutcome, RunnerError};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

const STDERR_CHUNK_BYTES: usize = 4096;

/// Runs agent invocations as child processes.
///
/// Stdout and stderr are drained concurrently so a chatty stderr can never
/// block the agent while the driver waits on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliProcessRunner;

impl CliProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for CliProcessRunner {
    async fn run(
        &self,
        invocation: &AgentInvocation,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<RunOutcome, RunnerError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &invocation.env_remove {
            command.env_remove(key);
        }
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), program = %invocation.program, "Agent process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "agent stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "agent stderr not captured"))?;

        let mut stdout = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut chunk = [0u8; STDERR_CHUNK_BYTES];
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                // read_until keeps partial data in `line` if the other branch wins
                read = stdout.read_until(b'\n', &mut line), if stdout_open => {
                    if read? == 0 {
                        stdout_open = false;
                        if !line.is_empty() {
                            sink.on_stdout_line(&decode_line(&line));
                            line.clear();
                        }
                    } else if line.last() == Some(&b'\n') {
                        sink.on_stdout_line(&decode_line(&line));
                        line.clear();
                    }
                }
                read = stderr.read(&mut chunk), if stderr_open => {
                    match read? {
                        0 => stderr_open = false,
                        n => sink.on_stderr(&chunk[..n]),
                    }
                }
            }
        }

        let status = child.wait().await?;
        debug!(status = ?status, "Agent process exited");

        Ok(RunOutcome {
            exit_code: status.code(),
        })
    }
}

/// Strips the line terminator and decodes lossily.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
