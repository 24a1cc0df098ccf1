//! Model Context Protocol
//!
//! JSON-RPC 2.0 over newline-delimited stdio, in both directions:
//!
//! - [`McpServer`] exposes a [`ToolCatalog`](agent_core::ToolCatalog) to MCP
//!   clients (`initialize`, `tools/list`, `tools/call`, `ping`)
//! - [`McpClient`] connects to an MCP server and [`register_remote_tools`]
//!   adds its tools to a local catalog next to the built-in ones

mod client;
mod server;

use agent_core::tool::{ParamType, ParameterSchema, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::{McpClient, McpServerConfig, RemoteTool, register_remote_tools};
pub use server::McpServer;

/// Protocol revision spoken by both ends
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// JSON-RPC request, or a notification when `id` is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Number or string; absent on notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params: None,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: impl Into<Value>) -> Self {
        self.params = Some(params.into());
        self
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    /// Id of the request answered; null when it could not be read
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A tool as MCP describes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl McpToolDefinition {
    pub fn from_schema(schema: &ToolSchema) -> Self {
        Self {
            name: schema.name.clone(),
            description: schema.description.clone(),
            input_schema: schema.json_schema(),
        }
    }

    /// Rebuild a catalog schema from the JSON Schema the server advertised.
    ///
    /// Properties without a usable `type` are treated as strings.
    pub fn to_schema(&self) -> ToolSchema {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut schema = ToolSchema::new(&self.name, &self.description);
        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object) else {
            return schema;
        };

        for (name, property) in properties {
            let param_type = json_type(property).unwrap_or(ParamType::String);
            let description = property
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();

            let mut param = if required.contains(&name.as_str()) {
                ParameterSchema::required(name, param_type, description)
            } else {
                ParameterSchema::optional(name, param_type, description)
            };
            if let Some(default) = property.get("default") {
                param = param.with_default(default.clone());
            }
            if let Some(values) = property.get("enum").and_then(Value::as_array) {
                param = param.with_enum(values.clone());
            }
            schema = schema.param(param);
        }
        schema
    }
}

/// `"type": "integer"` or `"type": ["integer", "null"]`
fn json_type(property: &Value) -> Option<ParamType> {
    let name = match property.get("type")? {
        Value::String(name) => name.as_str(),
        Value::Array(names) => names.iter().filter_map(Value::as_str).find(|n| *n != "null")?,
        _ => return None,
    };
    serde_json::from_value(Value::String(name.to_string())).ok()
}

/// Text blocks of a `tools/call` result
pub(crate) fn content_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
