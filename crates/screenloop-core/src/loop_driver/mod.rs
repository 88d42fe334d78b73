//! Iteration loop driver.
//!
//! Runs the agent once per iteration until it prints the completion marker,
//! fails too many times in a row, or the iteration budget runs out. Each
//! iteration's stdout is decoded line by line; only the text of the current
//! iteration is checked for the marker.

mod loop_state;
#[cfg(test)]
mod tests;

pub use loop_state::LoopState;

use crate::config::IterationConfig;
use crate::failure_policy::FailurePolicy;
use crate::invocation::{SessionMode, agent_invocation};
use crate::loop_log::{LogSummary, LoopLog};
use crate::stream_parser::{AgentEvent, DisplayLine, EventStreamParser};
use crate::text::truncate_with_ellipsis;
use screenloop_proto::{AgentInvocation, OutputSink, ProcessRunner, RunOutcome, RunnerError};
use std::path::Path;
use tracing::{debug, info, warn};

/// Characters of the prompt recorded in the log header.
const PROMPT_PREVIEW_CHARS: usize = 200;

/// Reason the loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The completion marker appeared in an iteration's output.
    Completed,
    /// The consecutive-failure threshold was reached.
    ConsecutiveFailuresExceeded,
    /// Every iteration ran without the marker appearing.
    MaxIterationsReached,
    /// The loop could not start.
    FatalError,
}

impl TerminationReason {
    /// Process exit code for this reason.
    ///
    /// - 0: completion marker detected
    /// - 1: consecutive failures or an unrecoverable error
    /// - 2: iteration budget exhausted
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminationReason::Completed => 0,
            TerminationReason::ConsecutiveFailuresExceeded | TerminationReason::FatalError => 1,
            TerminationReason::MaxIterationsReached => 2,
        }
    }

    /// Reason string written to the log summary.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Completed => "completion_marker_detected",
            TerminationReason::ConsecutiveFailuresExceeded => "consecutive_failures_exceeded",
            TerminationReason::MaxIterationsReached => "max_iterations_reached",
            TerminationReason::FatalError => "fatal_error",
        }
    }
}

/// Final state of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationOutcome {
    pub reason: TerminationReason,
    /// Iteration the loop stopped on.
    pub iteration: u32,
    pub max_iterations: u32,
    pub consecutive_failures: u32,
}

impl TerminationOutcome {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

/// Receives progress notifications from the driver.
///
/// Every method defaults to a no-op, so observers implement only what they
/// display.
#[allow(unused_variables)]
pub trait LoopObserver {
    fn on_loop_start(&mut self, config: &IterationConfig, log_path: &Path) {}

    fn on_iteration_start(&mut self, iteration: u32, max_iterations: u32) {}

    fn on_display(&mut self, line: &DisplayLine) {}

    /// A non-empty stdout line that was not JSON.
    fn on_non_json_line(&mut self, line: &str) {}

    fn on_stderr(&mut self, chunk: &[u8]) {}

    /// The agent exited non-zero, or was killed (`exit_code` is `None`).
    fn on_agent_failure(&mut self, exit_code: Option<i32>, consecutive_failures: u32, threshold: u32) {}

    fn on_fresh_retry(&mut self, iteration: u32) {}

    fn on_execution_error(&mut self, iteration: u32, error: &RunnerError) {}

    fn on_non_json_warning(&mut self, count: u32, threshold: u32) {}

    fn on_finish(&mut self, outcome: &TerminationOutcome) {}
}

impl LoopObserver for () {}

/// What one agent run produced.
#[derive(Debug, Clone, Copy)]
struct RunResult {
    outcome: RunOutcome,
    completed: bool,
}

/// Drives the agent through up to `max_iterations` runs.
pub struct LoopDriver<R, O> {
    config: IterationConfig,
    policy: FailurePolicy,
    runner: R,
    observer: O,
    log: LoopLog,
}

impl<R, O> LoopDriver<R, O>
where
    R: ProcessRunner,
    O: LoopObserver + Send,
{
    pub fn new(config: IterationConfig, runner: R, observer: O, log: LoopLog) -> Self {
        let policy = FailurePolicy::new(config.max_consecutive_failures);
        Self {
            config,
            policy,
            runner,
            observer,
            log,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Runs the loop to termination and writes the summary to the log.
    pub async fn run(&mut self) -> TerminationOutcome {
        self.write_header();
        self.observer.on_loop_start(&self.config, self.log.path());

        let max = self.config.max_iterations;
        let resume_mode = self.config.resume_mode();
        let mut state = LoopState::new();

        for iteration in 1..=max {
            state.begin_iteration(iteration);
            self.observer.on_iteration_start(iteration, max);
            self.log.info(&format!("=== Iteration {iteration}/{max} ==="));

            let prompt = if iteration == 1 || self.config.fresh {
                &self.config.full_prompt
            } else {
                &self.config.continuation_prompt
            };
            let mode = SessionMode::for_iteration(&self.config, iteration);
            let invocation = agent_invocation(&self.config, prompt, &mode);

            match self.run_agent(&invocation).await {
                Ok(result) if result.completed => {
                    return self.finish(TerminationReason::Completed, &state);
                }
                Ok(result) if result.outcome.success() => state.record_success(),
                Ok(result) => {
                    let failures = state.record_failure();
                    self.report_failure(result.outcome, failures);

                    if self
                        .policy
                        .should_retry_fresh(iteration, resume_mode, result.outcome.success())
                        && self.retry_fresh(iteration).await
                    {
                        return self.finish(TerminationReason::Completed, &state);
                    }
                }
                Err(e) => {
                    state.record_failure();
                    warn!("Agent execution failed on iteration {}: {}", iteration, e);
                    self.log
                        .error(&format!("Execution error on iteration {iteration}: {e}"));
                    self.observer.on_execution_error(iteration, &e);
                }
            }

            if self.policy.is_exhausted(state.consecutive_failures) {
                return self.finish(TerminationReason::ConsecutiveFailuresExceeded, &state);
            }
        }

        self.finish(TerminationReason::MaxIterationsReached, &state)
    }

    fn write_header(&mut self) {
        let config = &self.config;
        let lines = [
            format!("Starting loop: {}", config.name),
            format!("Iterations: {}", config.max_iterations),
            format!("Permission mode: {}", config.permission_mode),
            format!("Model: {}", config.model.as_deref().unwrap_or("default")),
            format!("Session ID: {}", config.session_id.as_deref().unwrap_or("none")),
            format!(
                "Resume: {}",
                if config.resume_mode() { "enabled" } else { "disabled" }
            ),
            format!("Max consecutive failures: {}", self.policy.threshold()),
        ];
        for line in &lines {
            self.log.info(line);
        }
        self.log.debug(&format!(
            "Prompt: {}",
            truncate_with_ellipsis(&config.base_prompt, PROMPT_PREVIEW_CHARS)
        ));
        self.log.raw_line("---");

        info!(
            name = %config.name,
            iterations = config.max_iterations,
            resume = config.resume_mode(),
            "Starting loop"
        );
    }

    fn report_failure(&mut self, outcome: RunOutcome, failures: u32) {
        let code = exit_code_label(outcome.exit_code);
        self.log.warn(&format!(
            "Agent exited with code {code} (consecutive failures: {failures})"
        ));
        debug!("Agent exited with code {} ({} consecutive)", code, failures);
        self.observer
            .on_agent_failure(outcome.exit_code, failures, self.policy.threshold());
    }

    /// Re-runs the iteration as an independent invocation of the full prompt.
    /// Returns true if the retry produced the completion marker.
    ///
    /// The retry's own failure is not counted against the threshold.
    async fn retry_fresh(&mut self, iteration: u32) -> bool {
        self.observer.on_fresh_retry(iteration);
        self.log.info("Retrying iteration as fresh invocation");

        let invocation = agent_invocation(
            &self.config,
            &self.config.full_prompt,
            &SessionMode::Independent,
        );
        match self.run_agent(&invocation).await {
            Ok(result) => result.completed,
            Err(e) => {
                warn!("Fresh retry failed to run on iteration {}: {}", iteration, e);
                self.log
                    .error(&format!("Fresh retry error on iteration {iteration}: {e}"));
                self.observer.on_execution_error(iteration, &e);
                false
            }
        }
    }

    async fn run_agent(&mut self, invocation: &AgentInvocation) -> Result<RunResult, RunnerError> {
        self.log
            .debug(&format!("Agent args: {:?}", invocation.args));
        debug!(program = %invocation.program, args = ?invocation.args, "Spawning agent");

        let mut collector = IterationCollector {
            log: &mut self.log,
            observer: &mut self.observer,
            text: String::new(),
            non_json_lines: 0,
        };
        let outcome = self.runner.run(invocation, &mut collector).await?;

        let IterationCollector {
            text,
            non_json_lines,
            ..
        } = collector;
        let threshold = self.config.non_json_warn_threshold;
        self.log
            .debug(&format!("Stream stats: {non_json_lines} non-JSON lines"));
        if non_json_lines > threshold {
            self.log.warn(&format!(
                "High non-JSON line count: {non_json_lines} (threshold: {threshold})"
            ));
            self.observer.on_non_json_warning(non_json_lines, threshold);
        }

        Ok(RunResult {
            outcome,
            completed: text.contains(&self.config.completion_marker),
        })
    }

    fn finish(&mut self, reason: TerminationReason, state: &LoopState) -> TerminationOutcome {
        let outcome = TerminationOutcome {
            reason,
            iteration: state.iteration,
            max_iterations: self.config.max_iterations,
            consecutive_failures: state.consecutive_failures,
        };

        match reason {
            TerminationReason::Completed => self
                .log
                .info(&format!("Completion detected on iteration {}", outcome.iteration)),
            TerminationReason::ConsecutiveFailuresExceeded => self.log.error(&format!(
                "Consecutive failure threshold ({}) reached",
                self.policy.threshold()
            )),
            TerminationReason::MaxIterationsReached => self
                .log
                .info(&format!("Max iterations ({}) reached", outcome.max_iterations)),
            TerminationReason::FatalError => {}
        }
        write_summary(&mut self.log, &outcome);

        info!(
            reason = reason.as_str(),
            iteration = outcome.iteration,
            consecutive_failures = outcome.consecutive_failures,
            "Loop terminated"
        );
        self.observer.on_finish(&outcome);
        outcome
    }
}

/// Records a loop that failed before its first iteration.
pub fn record_fatal(log: &mut LoopLog, message: &str, max_iterations: u32) -> TerminationOutcome {
    let outcome = TerminationOutcome {
        reason: TerminationReason::FatalError,
        iteration: 0,
        max_iterations,
        consecutive_failures: 0,
    };
    log.error(message);
    write_summary(log, &outcome);
    outcome
}

fn write_summary(log: &mut LoopLog, outcome: &TerminationOutcome) {
    log.summary(&LogSummary {
        reason: outcome.reason.as_str(),
        iteration: outcome.iteration,
        max_iterations: outcome.max_iterations,
        consecutive_failures: outcome.consecutive_failures,
    });
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Per-run output handling: logs, renders, and accumulates marker text.
struct IterationCollector<'a, O> {
    log: &'a mut LoopLog,
    observer: &'a mut O,
    text: String,
    non_json_lines: u32,
}

impl<O: LoopObserver> OutputSink for IterationCollector<'_, O> {
    fn on_stdout_line(&mut self, line: &str) {
        self.log.raw_line(line);

        match EventStreamParser::parse(line) {
            AgentEvent::Unparseable => {
                self.non_json_lines += 1;
                if !line.trim().is_empty() {
                    self.observer.on_non_json_line(line);
                }
            }
            event => {
                for display in event.render() {
                    self.observer.on_display(&display);
                }
                self.text.push_str(&event.extracted_text());
            }
        }
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        self.log.raw_bytes(chunk);
        self.observer.on_stderr(chunk);
    }
}
