//! Configuration for the loop driver and the session commands.
//!
//! Two layers feed a run:
//! - [`LoopEnv`]: the `AGENT_*` environment the loop process reads at startup
//! - [`ProjectConfig`]: `screenloop.yml`, consulted by the session commands and
//!   exported to detached loops as `AGENT_*` variables
//!
//! [`IterationConfig`] is the immutable result handed to the driver.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default completion marker the agent prints when all work is done.
pub const DEFAULT_COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

/// Default prompt for resumed iterations.
pub const DEFAULT_CONTINUATION_PROMPT: &str = "Continue working on the task.";

/// Default agent executable.
pub const DEFAULT_AGENT_BINARY: &str = "claude";

/// Default root for per-session log directories.
pub const DEFAULT_LOG_DIR: &str = ".screenloop/logs";

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_NON_JSON_WARN_THRESHOLD: u32 = 50;
pub const DEFAULT_ITERATIONS: u32 = 30;
pub const DEFAULT_PERMISSION_MODE: &str = "acceptEdits";

/// Errors detected before any process is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a prompt is required")]
    MissingPrompt,

    #[error("iteration count must be at least 1")]
    ZeroIterations,

    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("{key} must be at least 1")]
    ZeroThreshold { key: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Environment variables consumed by the loop process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEnv {
    pub prompt_suffix: String,
    pub log_dir: PathBuf,
    pub completion_marker: String,
    pub continuation_prompt: String,
    pub max_consecutive_failures: u32,
    pub non_json_warn_threshold: u32,
    pub agent_binary: String,
}

impl Default for LoopEnv {
    fn default() -> Self {
        Self {
            prompt_suffix: String::new(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            continuation_prompt: DEFAULT_CONTINUATION_PROMPT.to_string(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            non_json_warn_threshold: DEFAULT_NON_JSON_WARN_THRESHOLD,
            agent_binary: DEFAULT_AGENT_BINARY.to_string(),
        }
    }
}

impl LoopEnv {
    pub const PROMPT_SUFFIX: &'static str = "AGENT_PROMPT_SUFFIX";
    pub const LOG_DIR: &'static str = "AGENT_LOG_DIR";
    pub const COMPLETION_MARKER: &'static str = "AGENT_COMPLETION_MARKER";
    pub const CONTINUATION_PROMPT: &'static str = "AGENT_CONTINUATION_PROMPT";
    pub const MAX_CONSECUTIVE_FAILURES: &'static str = "AGENT_MAX_CONSECUTIVE_FAILURES";
    pub const NON_JSON_WARN_THRESHOLD: &'static str = "AGENT_NON_JSON_WARN_THRESHOLD";
    pub const AGENT_BINARY: &'static str = "AGENT_BINARY";

    /// Reads the loop environment from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the loop environment through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let defaults = Self::default();

        let max_consecutive_failures = match get(Self::MAX_CONSECUTIVE_FAILURES) {
            Some(raw) => parse_count(Self::MAX_CONSECUTIVE_FAILURES, &raw)?,
            None => defaults.max_consecutive_failures,
        };
        if max_consecutive_failures == 0 {
            return Err(ConfigError::ZeroThreshold {
                key: Self::MAX_CONSECUTIVE_FAILURES.to_string(),
            });
        }

        let non_json_warn_threshold = match get(Self::NON_JSON_WARN_THRESHOLD) {
            Some(raw) => parse_count(Self::NON_JSON_WARN_THRESHOLD, &raw)?,
            None => defaults.non_json_warn_threshold,
        };

        Ok(Self {
            prompt_suffix: get(Self::PROMPT_SUFFIX).unwrap_or(defaults.prompt_suffix),
            log_dir: get(Self::LOG_DIR).map_or(defaults.log_dir, PathBuf::from),
            completion_marker: get(Self::COMPLETION_MARKER).unwrap_or(defaults.completion_marker),
            continuation_prompt: get(Self::CONTINUATION_PROMPT)
                .unwrap_or(defaults.continuation_prompt),
            max_consecutive_failures,
            non_json_warn_threshold,
            agent_binary: get(Self::AGENT_BINARY).unwrap_or(defaults.agent_binary),
        })
    }
}

fn parse_count(key: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Caller-supplied options for one loop invocation.
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub name: String,
    /// Prompt file path or inline prompt text.
    pub prompt: Option<String>,
    pub iterations: u32,
    pub permission_mode: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub budget: Option<String>,
    pub fresh: bool,
    pub log_path: Option<PathBuf>,
}

/// Immutable configuration for one loop execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationConfig {
    pub name: String,
    /// Prompt without suffix, as resolved from the file or inline text.
    pub base_prompt: String,
    /// Prompt for iteration 1, fresh mode, and fallback retries.
    pub full_prompt: String,
    /// Prompt for resumed iterations.
    pub continuation_prompt: String,
    pub max_iterations: u32,
    pub permission_mode: String,
    pub model: Option<String>,
    pub budget: Option<String>,
    pub fresh: bool,
    pub session_id: Option<String>,
    pub max_consecutive_failures: u32,
    pub non_json_warn_threshold: u32,
    pub completion_marker: String,
    pub agent_binary: String,
    pub log_dir: PathBuf,
    pub log_path: Option<PathBuf>,
}

impl IterationConfig {
    /// Resolves options and environment into a validated configuration.
    pub fn resolve(options: LoopOptions, env: &LoopEnv) -> Result<Self, ConfigError> {
        if options.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        let prompt_arg = options.prompt.ok_or(ConfigError::MissingPrompt)?;
        let base_prompt = resolve_prompt_text(&prompt_arg)?;

        Ok(Self {
            name: options.name,
            full_prompt: with_suffix(&base_prompt, &env.prompt_suffix),
            continuation_prompt: with_suffix(&env.continuation_prompt, &env.prompt_suffix),
            base_prompt,
            max_iterations: options.iterations,
            permission_mode: options.permission_mode,
            model: options.model.filter(|m| !m.is_empty()),
            budget: options.budget.filter(|b| !b.is_empty()),
            fresh: options.fresh,
            session_id: options.session_id.filter(|s| !s.is_empty()),
            max_consecutive_failures: env.max_consecutive_failures,
            non_json_warn_threshold: env.non_json_warn_threshold,
            completion_marker: env.completion_marker.clone(),
            agent_binary: env.agent_binary.clone(),
            log_dir: env.log_dir.clone(),
            log_path: options.log_path,
        })
    }

    /// True when iterations after the first resume the configured session.
    pub fn resume_mode(&self) -> bool {
        !self.fresh && self.session_id.is_some()
    }
}

fn with_suffix(prompt: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt}\n\n{suffix}")
    }
}

/// Reads `arg` as a prompt file if one exists at that path, else uses it inline.
pub fn resolve_prompt_text(arg: &str) -> Result<String, ConfigError> {
    let path = Path::new(arg);
    let text = if !arg.is_empty() && path.is_file() {
        std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .trim()
            .to_string()
    } else {
        arg.to_string()
    };

    if text.trim().is_empty() {
        return Err(ConfigError::MissingPrompt);
    }
    Ok(text)
}

/// Project-level settings from `screenloop.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(rename = "loop")]
    pub loop_settings: LoopSettings,
    pub prompt: PromptSettings,
    pub screen: ScreenSettings,
    pub tracking: TrackingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub default_iterations: u32,
    pub permission_mode: String,
    pub model: Option<String>,
    pub completion_marker: String,
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            default_iterations: DEFAULT_ITERATIONS,
            permission_mode: DEFAULT_PERMISSION_MODE.to_string(),
            model: None,
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub suffix: String,
    pub continuation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    pub prefix: String,
    pub shell: String,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            prefix: "screenloop".to_string(),
            shell: "bash".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub file: PathBuf,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".live-agents"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub non_json_warn_threshold: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIR),
            non_json_warn_threshold: DEFAULT_NON_JSON_WARN_THRESHOLD,
        }
    }
}

impl ProjectConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Applies `SCREENLOOP_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(raw) = get("SCREENLOOP_LOOP_ITERATIONS") {
            self.loop_settings.default_iterations = parse_count("SCREENLOOP_LOOP_ITERATIONS", &raw)?;
        }
        if let Some(mode) = get("SCREENLOOP_PERMISSION_MODE") {
            self.loop_settings.permission_mode = mode;
        }
        if let Some(model) = get("SCREENLOOP_MODEL") {
            self.loop_settings.model = Some(model);
        }
        if let Some(shell) = get("SCREENLOOP_SCREEN_SHELL") {
            self.screen.shell = shell;
        }
        if let Some(file) = get("SCREENLOOP_TRACKING_FILE") {
            self.tracking.file = PathBuf::from(file);
        }
        if let Some(dir) = get("SCREENLOOP_LOG_DIR") {
            self.logging.directory = PathBuf::from(dir);
        }
        Ok(self)
    }

    /// The `AGENT_*` variables a detached loop needs, skipping empty values.
    pub fn loop_env_vars(&self) -> Vec<(&'static str, String)> {
        let vars = [
            (LoopEnv::PROMPT_SUFFIX, self.prompt.suffix.clone()),
            (
                LoopEnv::LOG_DIR,
                self.logging.directory.display().to_string(),
            ),
            (
                LoopEnv::COMPLETION_MARKER,
                self.loop_settings.completion_marker.clone(),
            ),
            (LoopEnv::CONTINUATION_PROMPT, self.prompt.continuation.clone()),
            (
                LoopEnv::MAX_CONSECUTIVE_FAILURES,
                self.loop_settings.max_consecutive_failures.to_string(),
            ),
            (
                LoopEnv::NON_JSON_WARN_THRESHOLD,
                self.logging.non_json_warn_threshold.to_string(),
            ),
        ];
        vars.into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect()
    }
}
