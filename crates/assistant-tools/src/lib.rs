//! # assistant-tools
//!
//! The assistant's built-in tools:
//!
//! - `get_weather` - current conditions for a city
//! - `log_message` - write to the system audit log
//! - `set_user_preference` / `get_user_preference` - per-user key/value
//!   preferences kept in the context store
//!
//! ## Example: one turn, two tools
//!
//! ```text
//! user:      Log "deploy started" then tell me the weather in London
//! assistant: ─▶ log_message { message: "deploy started" }      → true
//!            ─▶ get_weather { location: "London" }             → 16°C, Partly Cloudy
//! assistant: Logged. It is 16°C and partly cloudy in London.
//! ```

pub mod error;
pub mod model;
pub mod svckit;
pub mod weather;

use std::sync::Arc;

use agent_core::{ContextStore, ToolCatalog};

pub use error::{Result, ToolError};
pub use model::{AuditEntry, Severity, WeatherReport};
pub use weather::{FixedWeatherSource, WeatherSource};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        AuditLog, GetUserPreferenceTool, LogMessageTool, SetUserPreferenceTool, WeatherLookupTool,
    };
}

/// System prompt for the assistant; `{user_id}` is filled in per turn
pub const SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant. Use the available tools to answer questions and perform actions.

The current user's id is {user_id}. Pass it as `user_id` whenever you read or write a preference.

## Tools Available

- `get_weather` - Current weather conditions for a city
- `log_message` - Record a message in the system audit log (severity Info, Warning or Error)
- `set_user_preference` - Remember a preference for the user
- `get_user_preference` - Recall a preference; an empty result means it was never set

When a request involves several steps, perform them in the order the user asked."#;

/// Register every built-in tool, using `store` for preferences
pub fn register_all(
    catalog: &mut ToolCatalog,
    store: Arc<dyn ContextStore>,
    weather: Arc<dyn WeatherSource>,
) -> agent_core::Result<()> {
    use tools::*;

    catalog.register_tool(WeatherLookupTool::new(weather))?;
    catalog.register_tool(LogMessageTool::new())?;
    catalog.register_tool(SetUserPreferenceTool::new(store.clone()))?;
    catalog.register_tool(GetUserPreferenceTool::new(store))?;

    tracing::debug!(tools = ?catalog.names(), "Registered assistant tools");
    Ok(())
}

/// Catalog with every built-in tool and the fixed weather source
pub fn default_catalog(store: Arc<dyn ContextStore>) -> agent_core::Result<ToolCatalog> {
    let mut catalog = ToolCatalog::new();
    register_all(&mut catalog, store, Arc::new(FixedWeatherSource::new()))?;
    Ok(catalog)
}
