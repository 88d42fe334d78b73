//! Mutable state of one loop execution.

/// Counters owned by the driver for the lifetime of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    /// Current iteration (1-based), 0 before the first.
    pub iteration: u32,
    /// Non-zero exits and execution errors since the last zero exit.
    pub consecutive_failures: u32,
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// A zero exit resets the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }
}
