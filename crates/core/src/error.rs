//! Error types for the Agentry runtime.
//!
//! Uses `thiserror` for ergonomic error definitions. A validator rejection is
//! not an error: the action becomes a no-op and an event is published.

use thiserror::Error;

use crate::id::AgentId;

/// The top-level error type for all Agentry operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Agent errors ---
    #[error("Agent {agent_id} has been destroyed and no longer accepts actions")]
    AgentDestroyed { agent_id: AgentId },

    // --- Scheduling errors ---
    #[error("Failed to spawn thread '{name}': {reason}")]
    ThreadSpawn { name: String, reason: String },

    #[error("Every pool lane has shut down; no lane can accept work")]
    PoolExhausted,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error reports a submission to a destroyed agent.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Error::AgentDestroyed { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
