//! Error types for agent-runner

use std::path::PathBuf;
use thiserror::Error;

use hub_core::run::RunState;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running an agent
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Domain validation failed (agent id, tool call fields, transitions)
    #[error(transparent)]
    Core(#[from] hub_core::Error),

    /// Filesystem failure in the session store
    #[error("Store I/O error at {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Provider request or stream failed
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Hook rule file was rejected
    #[error("Invalid hook configuration: {message}")]
    PolicyConfig { message: String },

    /// Agent not known to the executor
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// Agent already has a live runner
    #[error("Agent {agent_id} is already running")]
    AgentExists { agent_id: String },

    /// Command does not apply in the current state
    #[error("Agent {agent_id} cannot go from {from} to {to}")]
    InvalidCommand {
        agent_id: String,
        from: RunState,
        to: RunState,
    },

    /// Channel closed
    #[error("Agent control channel closed")]
    ChannelClosed,
}

impl RunnerError {
    /// Create a Provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a PolicyConfig error
    pub fn policy_config(message: impl Into<String>) -> Self {
        Self::PolicyConfig {
            message: message.into(),
        }
    }

    pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }
}
