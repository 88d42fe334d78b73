//! Console rendering for the loop and the session commands.

use screenloop_core::{
    DisplayLine, IterationConfig, LoopObserver, TerminationOutcome, TerminationReason,
};
use screenloop_proto::RunnerError;
use std::io::Write;
use std::path::Path;

pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const BLUE: &str = "\x1b[34m";
}

/// Wraps `text` in `color` when colors are enabled.
pub struct Painter {
    use_colors: bool,
}

impl Painter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    pub fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{color}{text}{}", colors::RESET)
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{}{color}{text}{}", colors::BOLD, colors::RESET)
        } else {
            text.to_string()
        }
    }
}

/// Prints loop progress to stdout and diagnostics to stderr.
pub struct ConsoleObserver {
    painter: Painter,
}

impl ConsoleObserver {
    pub fn new(use_colors: bool) -> Self {
        Self {
            painter: Painter::new(use_colors),
        }
    }
}

impl LoopObserver for ConsoleObserver {
    fn on_loop_start(&mut self, config: &IterationConfig, log_path: &Path) {
        let p = &self.painter;
        let rows = [
            format!("Screenloop: {}", config.name),
            format!("Iterations: {}", config.max_iterations),
            format!("Session: {}", config.session_id.as_deref().unwrap_or("none")),
            format!(
                "Resume: {}",
                if config.resume_mode() { "enabled" } else { "disabled" }
            ),
            format!("Log: {}", log_path.display()),
        ];
        println!("{}", p.bold(colors::BLUE, &format!("╔{}╗", "═".repeat(38))));
        for row in &rows {
            println!("{}", p.bold(colors::BLUE, &format!("║  {row}")));
        }
        println!("{}", p.bold(colors::BLUE, &format!("╚{}╝", "═".repeat(38))));
        println!();
    }

    fn on_iteration_start(&mut self, iteration: u32, max_iterations: u32) {
        println!(
            "\n{}\n",
            self.painter.bold(
                colors::YELLOW,
                &format!("── Iteration {iteration}/{max_iterations} ──")
            )
        );
    }

    fn on_display(&mut self, line: &DisplayLine) {
        let p = &self.painter;
        match line {
            DisplayLine::Dialogue(text) => println!("{} {}", p.paint(colors::CYAN, "Claude:"), text),
            DisplayLine::ToolCall {
                name,
                input_preview,
            } => println!("{} {}({})", p.paint(colors::MAGENTA, "Tool:"), name, input_preview),
            DisplayLine::Result(text) => println!("{} {}", p.paint(colors::GREEN, "Result:"), text),
            DisplayLine::Metrics {
                cost_usd,
                duration_ms,
            } => {
                let duration = duration_ms.map_or_else(|| "?".to_string(), |ms| ms.to_string());
                println!(
                    "{}",
                    p.paint(
                        colors::DIM,
                        &format!("Cost: ${cost_usd:.4} | Duration: {duration}ms")
                    )
                );
            }
        }
    }

    fn on_non_json_line(&mut self, line: &str) {
        println!("{}", self.painter.paint(colors::DIM, line));
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}", self.painter.paint(colors::DIM, &text));
        let _ = stderr.flush();
    }

    fn on_agent_failure(&mut self, exit_code: Option<i32>, consecutive_failures: u32, threshold: u32) {
        let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        println!(
            "\n{}",
            self.painter.paint(
                colors::YELLOW,
                &format!(
                    "Claude exited with code {code} (failures: {consecutive_failures}/{threshold})"
                )
            )
        );
    }

    fn on_fresh_retry(&mut self, _iteration: u32) {
        println!(
            "{}",
            self.painter
                .paint(colors::YELLOW, "Resume may have failed, retrying as fresh...")
        );
    }

    fn on_execution_error(&mut self, iteration: u32, error: &RunnerError) {
        eprintln!(
            "\n{}",
            self.painter
                .paint(colors::RED, &format!("Error on iteration {iteration}: {error}"))
        );
    }

    fn on_non_json_warning(&mut self, count: u32, threshold: u32) {
        eprintln!(
            "{}",
            self.painter.paint(
                colors::YELLOW,
                &format!("Warning: {count} non-JSON lines in stream (threshold: {threshold})")
            )
        );
    }

    fn on_finish(&mut self, outcome: &TerminationOutcome) {
        let p = &self.painter;
        match outcome.reason {
            TerminationReason::Completed => println!(
                "\n{}",
                p.bold(
                    colors::GREEN,
                    &format!(
                        "✓ Completion marker detected on iteration {}. Done!",
                        outcome.iteration
                    )
                )
            ),
            TerminationReason::ConsecutiveFailuresExceeded => eprintln!(
                "\n{}",
                p.paint(
                    colors::RED,
                    &format!(
                        "Consecutive failure threshold ({}) reached. Stopping.",
                        outcome.consecutive_failures
                    )
                )
            ),
            TerminationReason::MaxIterationsReached => println!(
                "\n{}",
                p.bold(
                    colors::YELLOW,
                    &format!("Max iterations ({}) reached.", outcome.max_iterations)
                )
            ),
            TerminationReason::FatalError => {}
        }
    }
}

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Compact age such as `45s`, `12m`, `3h 5m` or `2d 4h`.
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}
