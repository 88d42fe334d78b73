//! Detached-session capability.

use crate::error::MultiplexerError;
use std::path::Path;

/// A terminal multiplexer that hosts detached loop sessions.
///
/// Names passed in are logical session names; implementations apply their
/// own prefixing via [`full_name`](Multiplexer::full_name).
pub trait Multiplexer: Send + Sync {
    /// Returns true if a session with this logical name is alive.
    fn is_alive(&self, name: &str) -> bool;

    /// Starts `command` detached under `name`, with `dir` as working directory.
    fn spawn(&self, name: &str, command: &str, dir: &Path) -> Result<(), MultiplexerError>;

    /// Terminates the session. Returns false if it was not running.
    fn terminate(&self, name: &str) -> bool;

    /// The backend-level session name for a logical name.
    fn full_name(&self, name: &str) -> String;

    /// Program and arguments that attach the current terminal to the session.
    fn attach_command(&self, name: &str) -> Vec<String>;
}
