//! Error types shared across Screenloop crates.

use thiserror::Error;

/// Errors raised while running one agent invocation.
///
/// A non-zero exit is not an error; it is reported through
/// [`RunOutcome`](crate::RunOutcome). These cover failures to run at all.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a terminal multiplexer backend.
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("session '{0}' is already running")]
    AlreadyRunning(String),

    #[error("failed to start session '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("multiplexer I/O error: {0}")]
    Io(#[from] std::io::Error),
}
