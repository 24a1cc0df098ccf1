//! Error Types for the assistant tools

use agent_core::ToolFailure;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Location must not be empty")]
    EmptyLocation,

    #[error("Preference key must not be empty")]
    EmptyPreferenceKey,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    /// Report as a failure of `tool`
    pub fn into_failure(self, tool: &str) -> ToolFailure {
        match self {
            ToolError::EmptyLocation | ToolError::EmptyPreferenceKey => ToolFailure::InvalidArguments {
                tool: tool.to_string(),
                reason: self.to_string(),
            },
            other => ToolFailure::execution(tool, other),
        }
    }
}
