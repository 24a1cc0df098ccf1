//! Service Kit - Agent Tools
//!
//! Tools that implement `agent_core::Tool` for the assistant.

mod log_message;
mod preferences;
mod weather_lookup;

pub use log_message::{AuditLog, LogMessageTool};
pub use preferences::{GetUserPreferenceTool, SetUserPreferenceTool};
pub use weather_lookup::WeatherLookupTool;
