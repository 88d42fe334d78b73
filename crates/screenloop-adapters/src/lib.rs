//! # screenloop-adapters
//!
//! Real implementations of the collaborator seams in `screenloop-proto`:
//! - [`CliProcessRunner`] spawns the agent CLI with tokio and streams its
//!   stdout line by line and its stderr as raw chunks
//! - [`ScreenMultiplexer`] hosts detached loops in GNU screen sessions

mod process_runner;
mod screen;

pub use process_runner::CliProcessRunner;
pub use screen::{ScreenMultiplexer, ScreenSession, parse_screen_list};
