//! # screenloop-core
//!
//! Core functionality for Screenloop.
//!
//! This crate provides:
//! - The iteration loop driver and its failure policy
//! - Decoding of the agent's stream-json output
//! - Loop and project configuration
//! - The per-run loop log
//! - The lock-guarded session registry shared across invocations

pub mod config;
mod failure_policy;
mod invocation;
mod loop_driver;
mod loop_log;
pub mod session_registry;
mod stream_parser;
pub mod testing;
mod text;

pub use config::{ConfigError, IterationConfig, LoopEnv, LoopOptions, ProjectConfig};
pub use failure_policy::FailurePolicy;
pub use invocation::{NESTED_SESSION_ENV, SessionMode, agent_invocation, build_agent_args};
pub use loop_driver::{
    LoopDriver, LoopObserver, LoopState, TerminationOutcome, TerminationReason, record_fatal,
};
pub use loop_log::{LogError, LogSummary, LoopLog};
pub use session_registry::{RegistryError, SessionRecord, SessionRegistry};
pub use stream_parser::{AgentEvent, ContentBlock, DisplayLine, EventStreamParser, ResultEvent};
pub use text::truncate_with_ellipsis;
