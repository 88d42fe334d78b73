//! Consecutive-failure and fresh-retry rules for the iteration loop.

/// Decides when failing iterations stop the loop and when a resumed
/// iteration gets a same-iteration fresh retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    threshold: u32,
}

impl FailurePolicy {
    /// Creates a policy that aborts after `threshold` consecutive failures.
    ///
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// True once the consecutive-failure count has reached the threshold.
    pub fn is_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.threshold
    }

    /// Whether a failed iteration should be retried once as an independent
    /// invocation of the full prompt.
    ///
    /// Only resumed iterations (iteration 2 onward, resume mode) that exited
    /// non-zero qualify.
    pub fn should_retry_fresh(&self, iteration: u32, resume_mode: bool, success: bool) -> bool {
        iteration > 1 && resume_mode && !success
    }
}
