//! Persistent registry of launched loop sessions.
//!
//! The registry is a single JSON object mapping session name to
//! [`SessionRecord`], shared by every `screenloop` invocation in a project.
//!
//! # Concurrency
//!
//! Every operation, reads included, runs inside an exclusive `flock()` on a
//! sibling `<file>.lock`. Writes go to a temporary file that is renamed over
//! the registry, so the document on disk is always complete.

use chrono::{DateTime, Utc};
use screenloop_proto::Multiplexer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file locking is not supported on this platform")]
    UnsupportedPlatform,
}

/// Metadata for one launched session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Logical session name, as passed to the multiplexer.
    pub name: String,
    /// Prompt file path, or a description of where the prompt came from.
    pub prompt_source: String,
    pub working_path: PathBuf,
    /// Agent session identifier used for resumption.
    pub session_id: String,
    pub model: Option<String>,
    pub iterations: u32,
    /// Backend-level multiplexer session name.
    pub screen_name: String,
    /// Assigned by the registry when the record is tracked.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// The document as stored. Entries stay undecoded so a read-modify-write
/// never drops records it cannot parse.
type Store = BTreeMap<String, Value>;

/// Lock-guarded session store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct SessionRegistry<M> {
    path: PathBuf,
    multiplexer: M,
}

impl<M: Multiplexer> SessionRegistry<M> {
    pub fn new(path: impl Into<PathBuf>, multiplexer: M) -> Self {
        Self {
            path: path.into(),
            multiplexer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    /// Every tracked session. A missing or corrupt file reads as empty.
    pub fn all(&self) -> Result<BTreeMap<String, SessionRecord>, RegistryError> {
        self.with_exclusive_lock(|| {
            Ok(self
                .read_store()
                .into_iter()
                .filter_map(|(name, value)| decode_entry(&name, value).map(|r| (name, r)))
                .collect())
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<SessionRecord>, RegistryError> {
        self.with_exclusive_lock(|| {
            Ok(self
                .read_store()
                .remove(name)
                .and_then(|value| decode_entry(name, value)))
        })
    }

    /// Stores `record` under `name` with a fresh `started_at`, replacing any
    /// previous entry.
    pub fn track(&self, name: &str, record: SessionRecord) -> Result<(), RegistryError> {
        self.with_exclusive_lock(|| {
            let mut store = self.read_store();
            let record = SessionRecord {
                started_at: Some(Utc::now()),
                ..record
            };
            store.insert(name.to_string(), serde_json::to_value(record)?);
            self.write_store(&store)?;
            debug!("Tracked session '{}' in {}", name, self.path.display());
            Ok(())
        })
    }

    /// Removes `name`; absent names are ignored.
    pub fn untrack(&self, name: &str) -> Result<(), RegistryError> {
        self.with_exclusive_lock(|| {
            let mut store = self.read_store();
            if store.remove(name).is_some() {
                self.write_store(&store)?;
                debug!("Untracked session '{}'", name);
            }
            Ok(())
        })
    }

    /// Removes every entry whose session is no longer alive and returns the
    /// removed names.
    pub fn clean(&self) -> Result<Vec<String>, RegistryError> {
        self.with_exclusive_lock(|| {
            let mut store = self.read_store();
            let dead: Vec<String> = store
                .iter()
                .filter(|(_, entry)| !self.entry_alive(entry))
                .map(|(name, _)| name.clone())
                .collect();

            if !dead.is_empty() {
                for name in &dead {
                    store.remove(name);
                }
                self.write_store(&store)?;
                debug!("Cleaned {} dead session(s): {:?}", dead.len(), dead);
            }
            Ok(dead)
        })
    }

    /// Tracked sessions that are still alive.
    pub fn running(&self) -> Result<BTreeMap<String, SessionRecord>, RegistryError> {
        let mut store = self.all()?;
        store.retain(|_, record| self.is_alive(record));
        Ok(store)
    }

    /// Liveness of one tracked session; untracked names are not running.
    pub fn is_running(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self
            .get(name)?
            .is_some_and(|record| self.is_alive(&record)))
    }

    fn is_alive(&self, record: &SessionRecord) -> bool {
        !record.name.is_empty() && self.multiplexer.is_alive(&record.name)
    }

    /// An entry without a non-empty string `name` has nothing to ask about.
    fn entry_alive(&self, entry: &Value) -> bool {
        entry
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty() && self.multiplexer.is_alive(name))
    }

    fn read_store(&self) -> Store {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Store::new(),
            Err(e) => {
                warn!("Failed to read registry {}: {}", self.path.display(), e);
                return Store::new();
            }
        };

        let entries = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(entries)) => entries,
            Ok(_) | Err(_) => {
                warn!("Registry {} is not a JSON object, treating as empty", self.path.display());
                return Store::new();
            }
        };

        entries.into_iter().collect()
    }

    fn write_store(&self, store: &Store) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut json = serde_json::to_string_pretty(store)?;
        json.push('\n');

        let tmp_path = sibling_path(&self.path, &format!(".tmp-{}", std::process::id()));
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        sibling_path(&self.path, ".lock")
    }

    /// Runs `f` while holding an exclusive lock on the sibling lock file.
    /// The lock is released when the guard drops, on every path.
    #[cfg(unix)]
    fn with_exclusive_lock<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> Result<T, RegistryError>,
    {
        use nix::fcntl::{Flock, FlockArg};

        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RegistryError::Lock {
                path: lock_path.clone(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| RegistryError::Lock {
                path: lock_path.clone(),
                source,
            })?;

        // Blocks until no other invocation holds the lock
        let _guard = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            RegistryError::Lock {
                path: lock_path.clone(),
                source: io::Error::new(io::ErrorKind::Other, format!("flock failed: {}", errno)),
            }
        })?;

        f()
    }

    #[cfg(not(unix))]
    fn with_exclusive_lock<T, F>(&self, _f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> Result<T, RegistryError>,
    {
        Err(RegistryError::UnsupportedPlatform)
    }
}

fn decode_entry(name: &str, value: Value) -> Option<SessionRecord> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping malformed registry entry '{}': {}", name, e);
            None
        }
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
