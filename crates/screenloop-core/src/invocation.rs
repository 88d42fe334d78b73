//! Agent command-line construction.

use crate::config::IterationConfig;
use screenloop_proto::AgentInvocation;

/// Environment marker the agent uses to detect that it runs inside another
/// agent session. Unset for every child so nested runs behave normally.
pub const NESTED_SESSION_ENV: &str = "CLAUDECODE";

/// How one invocation relates to the configured session identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// No session flags at all.
    Independent,
    /// Start a new session under this identifier.
    NewSession(String),
    /// Resume the session with this identifier.
    Resume(String),
}

impl SessionMode {
    /// Session handling for iteration `iteration` (1-based).
    pub fn for_iteration(config: &IterationConfig, iteration: u32) -> Self {
        match (&config.session_id, config.fresh) {
            (_, true) | (None, false) => SessionMode::Independent,
            (Some(id), false) if iteration == 1 => SessionMode::NewSession(id.clone()),
            (Some(id), false) => SessionMode::Resume(id.clone()),
        }
    }
}

/// Builds the argument vector for one agent run.
///
/// Resume flags lead the vector; a new-session identifier trails it.
pub fn build_agent_args(config: &IterationConfig, prompt: &str, mode: &SessionMode) -> Vec<String> {
    let mut args = Vec::with_capacity(14);

    if let SessionMode::Resume(id) = mode {
        args.push("--resume".to_string());
        args.push(id.clone());
    }

    args.extend([
        "-p".to_string(),
        prompt.to_string(),
        "--verbose".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--permission-mode".to_string(),
        config.permission_mode.clone(),
    ]);

    if let Some(model) = &config.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(budget) = &config.budget {
        args.push("--max-budget-usd".to_string());
        args.push(budget.clone());
    }

    if let SessionMode::NewSession(id) = mode {
        args.push("--session-id".to_string());
        args.push(id.clone());
    }

    args
}

/// Full invocation of the configured agent binary.
pub fn agent_invocation(config: &IterationConfig, prompt: &str, mode: &SessionMode) -> AgentInvocation {
    AgentInvocation::new(
        config.agent_binary.clone(),
        build_agent_args(config, prompt, mode),
    )
    .without_env(NESTED_SESSION_ENV)
}
