use super::*;
use crate::config::{LoopEnv, LoopOptions};
use crate::testing::{ScriptedRun, ScriptedRunner};
use tempfile::TempDir;

const MARKER: &str = "<promise>COMPLETE</promise>";

#[derive(Debug, Default)]
struct RecordingObserver {
    iterations: Vec<u32>,
    displays: Vec<DisplayLine>,
    non_json: Vec<String>,
    failures: Vec<(Option<i32>, u32)>,
    fresh_retries: Vec<u32>,
    execution_errors: u32,
    non_json_warnings: Vec<u32>,
    finished: Option<TerminationOutcome>,
}

impl LoopObserver for RecordingObserver {
    fn on_iteration_start(&mut self, iteration: u32, _max_iterations: u32) {
        self.iterations.push(iteration);
    }

    fn on_display(&mut self, line: &DisplayLine) {
        self.displays.push(line.clone());
    }

    fn on_non_json_line(&mut self, line: &str) {
        self.non_json.push(line.to_string());
    }

    fn on_agent_failure(&mut self, exit_code: Option<i32>, consecutive_failures: u32, _threshold: u32) {
        self.failures.push((exit_code, consecutive_failures));
    }

    fn on_fresh_retry(&mut self, iteration: u32) {
        self.fresh_retries.push(iteration);
    }

    fn on_execution_error(&mut self, _iteration: u32, _error: &RunnerError) {
        self.execution_errors += 1;
    }

    fn on_non_json_warning(&mut self, count: u32, _threshold: u32) {
        self.non_json_warnings.push(count);
    }

    fn on_finish(&mut self, outcome: &TerminationOutcome) {
        self.finished = Some(*outcome);
    }
}

struct Harness {
    _temp: TempDir,
    runner: ScriptedRunner,
    driver: LoopDriver<ScriptedRunner, RecordingObserver>,
}

impl Harness {
    fn log_contents(&self) -> String {
        std::fs::read_to_string(self.driver.log_path()).unwrap()
    }
}

fn config(iterations: u32, session_id: Option<&str>, fresh: bool) -> IterationConfig {
    let env = LoopEnv {
        prompt_suffix: "Commit often.".into(),
        non_json_warn_threshold: 2,
        ..LoopEnv::default()
    };
    IterationConfig::resolve(
        LoopOptions {
            name: "demo".into(),
            prompt: Some("Build the feature".into()),
            iterations,
            permission_mode: "acceptEdits".into(),
            session_id: session_id.map(String::from),
            fresh,
            ..LoopOptions::default()
        },
        &env,
    )
    .unwrap()
}

fn harness(config: IterationConfig, runs: Vec<ScriptedRun>) -> Harness {
    let temp = TempDir::new().unwrap();
    let log = LoopLog::open(temp.path().join("demo/run.log")).unwrap();
    let runner = ScriptedRunner::new(runs);
    let driver = LoopDriver::new(config, runner.clone(), RecordingObserver::default(), log);
    Harness {
        _temp: temp,
        runner,
        driver,
    }
}

fn prompt_of(invocation: &AgentInvocation) -> &str {
    let idx = invocation.args.iter().position(|a| a == "-p").unwrap();
    &invocation.args[idx + 1]
}

#[tokio::test]
async fn test_marker_completes_even_on_nonzero_exit() {
    let mut h = harness(
        config(5, None, false),
        vec![
            ScriptedRun::exit(0).text("working"),
            ScriptedRun::exit(1).text(&format!("all done {MARKER}")),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::Completed);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.iteration, 2);
    assert_eq!(h.runner.invocation_count(), 2);
    assert!(h.driver.observer().failures.is_empty());
}

#[tokio::test]
async fn test_marker_split_across_lines_of_one_iteration() {
    let mut h = harness(
        config(3, None, false),
        vec![
            ScriptedRun::exit(0)
                .text("<promise>COMP")
                .line(r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}}"#)
                .result("LETE</promise>"),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::Completed);
    assert_eq!(outcome.iteration, 1);
}

#[tokio::test]
async fn test_marker_text_is_not_carried_between_iterations() {
    let mut h = harness(
        config(2, None, false),
        vec![
            ScriptedRun::exit(0).text("<promise>COMP"),
            ScriptedRun::exit(0).text("LETE</promise>"),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
}

#[tokio::test]
async fn test_marker_match_is_case_sensitive() {
    let mut h = harness(
        config(1, None, false),
        vec![ScriptedRun::exit(0).text("<PROMISE>COMPLETE</PROMISE>")],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
    assert_eq!(outcome.exit_code(), 2);
}

#[tokio::test]
async fn test_marker_in_tool_input_does_not_count() {
    let tool_line = format!(
        r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"Write","input":{{"content":"{}"}}}}]}}}}"#,
        "<promise>COMPLETE</promise>"
    );
    let mut h = harness(config(1, None, false), vec![ScriptedRun::exit(0).line(tool_line)]);

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
}

#[tokio::test]
async fn test_threshold_stops_exactly_when_reached() {
    let mut h = harness(
        config(10, None, false),
        vec![
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::ConsecutiveFailuresExceeded);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.iteration, 3);
    assert_eq!(outcome.consecutive_failures, 3);
    assert_eq!(h.runner.invocation_count(), 3);
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let mut h = harness(
        config(6, None, false),
        vec![
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::exit(0),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::exit(0),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
    assert_eq!(outcome.iteration, 6);
    assert_eq!(outcome.consecutive_failures, 0);
    let counts: Vec<u32> = h.driver.observer().failures.iter().map(|f| f.1).collect();
    assert_eq!(counts, vec![1, 2, 1, 2]);
}

#[tokio::test]
async fn test_all_successful_without_marker_exits_two() {
    let mut h = harness(config(3, None, false), Vec::new());

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(h.driver.observer().iterations, vec![1, 2, 3]);
    assert_eq!(h.driver.observer().finished, Some(outcome));
}

#[tokio::test]
async fn test_execution_errors_count_as_failures() {
    let mut h = harness(
        config(5, None, false),
        vec![
            ScriptedRun::spawn_error(),
            ScriptedRun::exit(2),
            ScriptedRun::spawn_error(),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::ConsecutiveFailuresExceeded);
    assert_eq!(outcome.iteration, 3);
    assert_eq!(h.driver.observer().execution_errors, 2);
    assert!(h.log_contents().contains("[ERROR] Execution error on iteration 1"));
}

#[tokio::test]
async fn test_signal_kill_counts_as_failure() {
    let mut h = harness(config(1, None, false), vec![ScriptedRun::killed()]);

    let outcome = h.driver.run().await;

    assert_eq!(outcome.consecutive_failures, 1);
    assert_eq!(h.driver.observer().failures, vec![(None, 1)]);
    assert!(h.log_contents().contains("Agent exited with code signal"));
}

#[tokio::test]
async fn test_session_flags_per_iteration_in_resume_mode() {
    let mut h = harness(config(3, Some("sess-1"), false), Vec::new());

    h.driver.run().await;

    let invocations = h.runner.invocations();
    assert_eq!(invocations.len(), 3);

    let first = &invocations[0].args;
    assert_eq!(first[first.len() - 2..], ["--session-id", "sess-1"]);
    assert_eq!(prompt_of(&invocations[0]), "Build the feature\n\nCommit often.");

    for later in &invocations[1..] {
        assert_eq!(later.args[..2], ["--resume", "sess-1"]);
        assert_eq!(prompt_of(later), "Continue working on the task.\n\nCommit often.");
    }
    assert!(
        invocations
            .iter()
            .all(|i| i.env_remove == vec![crate::invocation::NESTED_SESSION_ENV.to_string()])
    );
}

#[tokio::test]
async fn test_fresh_mode_uses_full_prompt_without_session_flags() {
    let mut h = harness(config(2, Some("sess-1"), true), Vec::new());

    h.driver.run().await;

    for invocation in h.runner.invocations() {
        assert_eq!(prompt_of(&invocation), "Build the feature\n\nCommit often.");
        assert!(!invocation.args.iter().any(|a| a == "--resume" || a == "--session-id"));
    }
}

#[tokio::test]
async fn test_resume_failure_triggers_one_fresh_retry_that_completes() {
    let mut h = harness(
        config(5, Some("sess-1"), false),
        vec![
            ScriptedRun::exit(0),
            ScriptedRun::exit(1).stderr(b"No conversation found"),
            ScriptedRun::exit(0).text(MARKER),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::Completed);
    assert_eq!(outcome.iteration, 2);
    assert_eq!(outcome.consecutive_failures, 1);
    assert_eq!(h.driver.observer().fresh_retries, vec![2]);

    let invocations = h.runner.invocations();
    assert_eq!(invocations.len(), 3);
    let retry = &invocations[2];
    assert_eq!(prompt_of(retry), "Build the feature\n\nCommit often.");
    assert!(!retry.args.iter().any(|a| a == "--resume" || a == "--session-id"));
    assert!(h.log_contents().contains("No conversation found"));
}

#[tokio::test]
async fn test_failed_fresh_retry_is_not_counted_twice() {
    let mut h = harness(
        config(5, Some("sess-1"), false),
        vec![
            ScriptedRun::exit(0),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
            ScriptedRun::spawn_error(),
            ScriptedRun::exit(1),
            ScriptedRun::exit(1),
        ],
    );

    let outcome = h.driver.run().await;

    assert_eq!(outcome.reason, TerminationReason::ConsecutiveFailuresExceeded);
    assert_eq!(outcome.iteration, 4);
    assert_eq!(outcome.consecutive_failures, 3);
    assert_eq!(h.driver.observer().fresh_retries, vec![2, 3, 4]);
    assert_eq!(h.driver.observer().execution_errors, 1);
    assert_eq!(h.runner.invocation_count(), 7);
}

#[tokio::test]
async fn test_no_fresh_retry_on_first_iteration_or_without_session() {
    let mut resumable = harness(
        config(1, Some("sess-1"), false),
        vec![ScriptedRun::exit(1), ScriptedRun::exit(0).text(MARKER)],
    );
    let outcome = resumable.driver.run().await;
    assert_eq!(outcome.reason, TerminationReason::MaxIterationsReached);
    assert!(resumable.driver.observer().fresh_retries.is_empty());
    assert_eq!(resumable.runner.invocation_count(), 1);

    let mut anonymous = harness(
        config(2, None, false),
        vec![ScriptedRun::exit(0), ScriptedRun::exit(1)],
    );
    anonymous.driver.run().await;
    assert!(anonymous.driver.observer().fresh_retries.is_empty());
    assert_eq!(anonymous.runner.invocation_count(), 2);
}

#[tokio::test]
async fn test_non_json_lines_are_counted_echoed_and_warned() {
    let mut h = harness(
        config(1, None, false),
        vec![
            ScriptedRun::exit(0)
                .line("progress: 10%")
                .line("")
                .line("progress: 90%")
                .text("hello"),
        ],
    );

    h.driver.run().await;

    let observer = h.driver.observer();
    assert_eq!(observer.non_json, vec!["progress: 10%", "progress: 90%"]);
    assert_eq!(observer.non_json_warnings, vec![3]);
    assert_eq!(observer.displays, vec![DisplayLine::Dialogue("hello".into())]);
    let log = h.log_contents();
    assert!(log.contains("\nprogress: 10%\n"));
    assert!(log.contains("[WARN] High non-JSON line count: 3 (threshold: 2)"));
}

#[tokio::test]
async fn test_log_has_header_and_summary() {
    let mut h = harness(
        config(2, Some("sess-1"), false),
        vec![ScriptedRun::exit(0).text(MARKER)],
    );

    h.driver.run().await;

    let log = h.log_contents();
    assert!(log.contains("[INFO] Starting loop: demo"));
    assert!(log.contains("[INFO] Resume: enabled"));
    assert!(log.contains("[INFO] Max consecutive failures: 3"));
    assert!(log.contains("[DEBUG] Agent args: "));
    assert!(log.contains("[INFO] === Iteration 1/2 ==="));
    assert!(log.contains("Reason: completion_marker_detected\nIterations: 1/2\nConsecutive failures: 0\n"));
}

#[test]
fn test_termination_reason_codes_and_strings() {
    assert_eq!(TerminationReason::Completed.exit_code(), 0);
    assert_eq!(TerminationReason::ConsecutiveFailuresExceeded.exit_code(), 1);
    assert_eq!(TerminationReason::FatalError.exit_code(), 1);
    assert_eq!(TerminationReason::MaxIterationsReached.exit_code(), 2);
    assert_eq!(
        TerminationReason::ConsecutiveFailuresExceeded.as_str(),
        "consecutive_failures_exceeded"
    );
}

#[test]
fn test_record_fatal_writes_summary() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fatal.log");
    let mut log = LoopLog::open(&path).unwrap();

    let outcome = record_fatal(&mut log, "prompt file unreadable", 30);

    assert_eq!(outcome.exit_code(), 1);
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[ERROR] prompt file unreadable"));
    assert!(content.contains("Reason: fatal_error\nIterations: 0/30\n"));
}
