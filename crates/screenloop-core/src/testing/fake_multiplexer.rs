//! In-memory multiplexer for registry and command tests.

use screenloop_proto::{Multiplexer, MultiplexerError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A spawned session as seen by [`FakeMultiplexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub name: String,
    pub command: String,
    pub dir: PathBuf,
}

/// Multiplexer whose live sessions are a configurable set of names.
#[derive(Debug, Clone, Default)]
pub struct FakeMultiplexer {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    alive: BTreeSet<String>,
    spawned: Vec<SpawnRecord>,
    terminated: Vec<String>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `names` reported alive.
    pub fn with_alive<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fake = Self::new();
        fake.lock().alive = names.into_iter().map(Into::into).collect();
        fake
    }

    pub fn set_alive(&self, name: &str, alive: bool) {
        let mut state = self.lock();
        if alive {
            state.alive.insert(name.to_string());
        } else {
            state.alive.remove(name);
        }
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.lock().spawned.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Multiplexer for FakeMultiplexer {
    fn is_alive(&self, name: &str) -> bool {
        self.lock().alive.contains(name)
    }

    fn spawn(&self, name: &str, command: &str, dir: &Path) -> Result<(), MultiplexerError> {
        let mut state = self.lock();
        if state.alive.contains(name) {
            return Err(MultiplexerError::AlreadyRunning(self.full_name(name)));
        }
        state.alive.insert(name.to_string());
        state.spawned.push(SpawnRecord {
            name: name.to_string(),
            command: command.to_string(),
            dir: dir.to_path_buf(),
        });
        Ok(())
    }

    fn terminate(&self, name: &str) -> bool {
        let mut state = self.lock();
        let was_alive = state.alive.remove(name);
        if was_alive {
            state.terminated.push(name.to_string());
        }
        was_alive
    }

    fn full_name(&self, name: &str) -> String {
        format!("screenloop-{name}")
    }

    fn attach_command(&self, name: &str) -> Vec<String> {
        vec!["screen".to_string(), "-r".to_string(), self.full_name(name)]
    }
}
