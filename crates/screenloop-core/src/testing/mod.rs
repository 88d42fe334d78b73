//! Test doubles for the collaborator seams.

pub mod fake_multiplexer;
pub mod scripted_runner;

pub use fake_multiplexer::FakeMultiplexer;
pub use scripted_runner::{ScriptedRun, ScriptedRunner};
