//! Weather Lookup Tool
//!
//! Current weather conditions for a city.

use std::sync::Arc;

use agent_core::tool::{ParamType, ParameterSchema, ToolArguments};
use agent_core::{Tool, ToolOutput, ToolResult, ToolSchema};
use async_trait::async_trait;

use crate::weather::WeatherSource;

pub const NAME: &str = "get_weather";

/// Tool for looking up the weather
pub struct WeatherLookupTool {
    source: Arc<dyn WeatherSource>,
}

impl WeatherLookupTool {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for WeatherLookupTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(NAME, "Gets the current weather conditions for a specified city.")
            .param(ParameterSchema::required(
                "location",
                ParamType::String,
                "The city to get weather for, e.g., 'London' or 'New York'.",
            ))
            .category("weather")
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        let location = args.str("location")?;
        tracing::info!(tool = NAME, location = %location, source = self.source.name(), "Fetching weather");

        let report = self
            .source
            .current(location)
            .await
            .map_err(|e| e.into_failure(NAME))?;

        let value = serde_json::to_value(&report).map_err(|e| crate::ToolError::from(e).into_failure(NAME))?;
        Ok(ToolOutput(value))
    }
}
