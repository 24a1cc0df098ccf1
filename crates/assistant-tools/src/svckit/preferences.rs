//! User Preference Tools
//!
//! Read and write per-user preferences held in the context store. Both tools
//! take the user id as an argument; the system prompt tells the model which
//! id belongs to the current conversation.

use std::sync::Arc;

use agent_core::tool::{ParamType, ParameterSchema, ToolArguments};
use agent_core::{ContextStore, Tool, ToolOutput, ToolResult, ToolSchema};
use async_trait::async_trait;

use crate::error::ToolError;

pub const SET_NAME: &str = "set_user_preference";
pub const GET_NAME: &str = "get_user_preference";

fn user_id_param(verb: &str) -> ParameterSchema {
    ParameterSchema::required(
        "user_id",
        ParamType::String,
        format!("The ID of the user whose preference to {}.", verb),
    )
}

fn key<'a>(args: &'a ToolArguments, tool: &str) -> Result<&'a str, agent_core::ToolFailure> {
    let key = args.str("key")?.trim();
    if key.is_empty() {
        return Err(ToolError::EmptyPreferenceKey.into_failure(tool));
    }
    Ok(key)
}

/// Tool for setting a preference
pub struct SetUserPreferenceTool {
    store: Arc<dyn ContextStore>,
}

impl SetUserPreferenceTool {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SetUserPreferenceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            SET_NAME,
            "Sets a user preference key-value pair in their profile. Requires a userId.",
        )
        .param(user_id_param("set"))
        .param(ParameterSchema::required(
            "key",
            ParamType::String,
            "The preference key (e.g., 'preferred_city', 'theme').",
        ))
        .param(ParameterSchema::required("value", ParamType::String, "The preference value."))
        .category("preferences")
        .side_effects()
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        let user_id = args.str("user_id")?;
        let key = key(&args, SET_NAME)?;
        let value = args.str("value")?;

        self.store.set_preference(user_id, key, value);
        tracing::info!(user_id = %user_id, key = %key, "Preference set");

        Ok(ToolOutput::from(true))
    }
}

/// Tool for reading a preference; a missing key yields an empty string
pub struct GetUserPreferenceTool {
    store: Arc<dyn ContextStore>,
}

impl GetUserPreferenceTool {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserPreferenceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            GET_NAME,
            "Retrieves a user preference by key from their profile. Requires a userId.",
        )
        .param(user_id_param("retrieve"))
        .param(ParameterSchema::required("key", ParamType::String, "The preference key."))
        .category("preferences")
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        let user_id = args.str("user_id")?;
        let key = key(&args, GET_NAME)?;

        let value = self.store.preference(user_id, key);
        tracing::debug!(user_id = %user_id, key = %key, found = value.is_some(), "Preference lookup");

        Ok(ToolOutput::from(value.unwrap_or_default()))
    }
}
