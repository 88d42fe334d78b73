//! # screenloop-proto
//!
//! Shared types, error definitions, and collaborator traits for Screenloop.
//!
//! This crate holds the seams between the loop driver and the outside world:
//! - [`ProcessRunner`]: spawns one agent invocation and streams its output
//! - [`Multiplexer`]: the detached-session wrapper used for liveness checks
//!
//! Both are traits so the core can be exercised without real subprocesses.

mod error;
mod multiplexer;
mod runner;

pub use error::{MultiplexerError, RunnerError};
pub use multiplexer::Multiplexer;
pub use runner::{AgentInvocation, OutputSink, ProcessRunner, RunOutcome};
