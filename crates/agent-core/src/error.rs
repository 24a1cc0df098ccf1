//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Turn-level and setup errors.
///
/// Tool failures are not part of this enum: they are recovered inside the
/// turn and shown to the model (see [`crate::tool::ToolFailure`]).
#[derive(Error, Debug)]
pub enum AgentError {
    /// The completion stream reported a failure
    #[error("Backend failure: {0}")]
    Backend(String),

    /// No event arrived from the completion stream within the idle timeout
    #[error("Completion stream timed out after {0:?}")]
    StreamTimeout(Duration),

    /// The model kept requesting tools past the configured cap
    #[error("Tool chain exceeded {0} rounds")]
    ToolChainExceeded(usize),

    /// The turn was aborted by its caller
    #[error("Turn cancelled")]
    Cancelled,

    /// A tool with this name is already in the catalog
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// A Model Context Protocol peer failed or misbehaved
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Whether the failure happened inside a turn (as opposed to setup).
    pub fn is_turn_failure(&self) -> bool {
        matches!(
            self,
            AgentError::Backend(_)
                | AgentError::StreamTimeout(_)
                | AgentError::ToolChainExceeded(_)
                | AgentError::Cancelled
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Backend(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::StreamTimeout(_) => "The AI service stopped responding. Please try again.".into(),
            AgentError::ToolChainExceeded(_) => "The request needed too many tool calls. Please try a simpler query.".into(),
            AgentError::Cancelled => "The request was cancelled.".into(),
            AgentError::Config(msg) => format!("The assistant is misconfigured: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
