//! Tool System
//!
//! Static catalog of invocable tools. Each [`ToolDescriptor`] pairs an
//! explicit [`ToolSchema`] with a handler implementing [`Tool`]. The catalog
//! is built at startup, then shared read-only (`Arc<ToolCatalog>`) by every
//! turn of every user.
//!
//! Arguments are validated against the schema before a handler runs:
//! required parameters must be present, optional ones receive their default,
//! and values are coerced to the declared type. A validation failure never
//! reaches the handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::error::{AgentError, Result};

/// 2^63; integral floats in `[-2^63, 2^63)` convert to `i64` exactly
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Declared type of a tool parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// JSON Schema type name
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    /// Coerce `value` into this type, if it has a lossless reading.
    fn coerce(self, value: Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (ParamType::String, Value::String(s)) => Ok(Value::String(s)),
            (ParamType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
                Ok(Value::String(v.to_string()))
            }

            (ParamType::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(json!(i))
                } else if let Some(f) = n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(f))
                {
                    Ok(json!(f as i64))
                } else {
                    Err(format!("expected an integer, got {}", n))
                }
            }
            (ParamType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| format!("expected an integer, got \"{}\"", s)),

            (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got \"{}\"", s)),

            (ParamType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected a boolean, got \"{}\"", s)),
            },

            (ParamType::Object, v @ Value::Object(_)) => Ok(v),
            (ParamType::Array, v @ Value::Array(_)) => Ok(v),
            (ParamType::Object | ParamType::Array, Value::String(s)) => {
                match serde_json::from_str::<Value>(&s) {
                    Ok(v @ Value::Object(_)) if self == ParamType::Object => Ok(v),
                    Ok(v @ Value::Array(_)) if self == ParamType::Array => Ok(v),
                    _ => Err(format!("expected {}, got a string", self.as_str())),
                }
            }

            (ty, other) => Err(format!("expected {}, got {}", ty.as_str(), json_kind(&other))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    /// A required parameter
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    /// An optional parameter
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Tool definition schema (for LLM function calling)
///
/// This is everything the backend gets to see about a tool; handlers never
/// cross that boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions, in declaration order
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping
    #[serde(default)]
    pub category: Option<String>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            category: None,
            has_side_effects: false,
        }
    }

    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn side_effects(mut self) -> Self {
        self.has_side_effects = true;
        self
    }

    /// JSON Schema object describing the parameters
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type.as_str()));
            prop.insert("description".into(), json!(param.description));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate and normalize raw arguments against this schema.
    pub fn validate(&self, raw: &Value) -> std::result::Result<ToolArguments, ToolFailure> {
        let invalid = |reason: String| ToolFailure::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let mut values = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(invalid(format!(
                    "arguments must be a JSON object, got {}",
                    json_kind(other)
                )));
            }
        };

        for param in &self.parameters {
            let supplied = values.remove(&param.name).filter(|v| !v.is_null());

            let value = match (supplied, &param.default) {
                (Some(v), _) => param
                    .param_type
                    .coerce(v)
                    .map_err(|e| invalid(format!("parameter '{}': {}", param.name, e)))?,
                (None, Some(default)) => default.clone(),
                (None, None) if param.required => {
                    return Err(invalid(format!("missing required parameter '{}'", param.name)));
                }
                (None, None) => continue,
            };

            if let Some(allowed) = &param.enum_values {
                if !allowed.contains(&value) {
                    return Err(invalid(format!(
                        "parameter '{}' must be one of {}",
                        param.name,
                        Value::Array(allowed.clone())
                    )));
                }
            }

            values.insert(param.name.clone(), value);
        }

        Ok(ToolArguments {
            tool: self.name.clone(),
            values,
        })
    }
}

/// Typed failure of a tool invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolFailure {
    /// No tool with this name in the catalog
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Arguments did not satisfy the tool's schema
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The handler ran and failed (including timeouts)
    #[error("Tool '{tool}' failed: {cause}")]
    Execution { tool: String, cause: String },
}

impl ToolFailure {
    pub fn execution(tool: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        ToolFailure::Execution {
            tool: tool.into(),
            cause: cause.to_string(),
        }
    }

    /// Only handler failures are worth retrying; the other two are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolFailure::Execution { .. })
    }
}

/// Successful tool output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolOutput(pub Value);

impl ToolOutput {
    /// Render for inclusion in a tool message
    pub fn to_text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput(Value::String(s))
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput(Value::String(s.to_string()))
    }
}

impl From<bool> for ToolOutput {
    fn from(b: bool) -> Self {
        ToolOutput(Value::Bool(b))
    }
}

impl From<Value> for ToolOutput {
    fn from(v: Value) -> Self {
        ToolOutput(v)
    }
}

/// Result of a tool invocation
pub type ToolResult = std::result::Result<ToolOutput, ToolFailure>;

/// Validated arguments handed to a tool handler
#[derive(Clone, Debug)]
pub struct ToolArguments {
    tool: String,
    values: Map<String, Value>,
}

impl ToolArguments {
    /// Raw value of a parameter
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// String parameter; fails with `InvalidArguments` when absent
    pub fn str(&self, name: &str) -> std::result::Result<&str, ToolFailure> {
        self.opt_str(name).ok_or_else(|| ToolFailure::InvalidArguments {
            tool: self.tool.clone(),
            reason: format!("missing string parameter '{}'", name),
        })
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// The validated arguments as a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments
    async fn execute(&self, args: ToolArguments) -> ToolResult;
}

/// Adapter turning an async closure into a [`Tool`]
struct FnTool<F> {
    schema: ToolSchema,
    f: F,
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolArguments) -> Fut + Send + Sync,
    Fut: Future<Output = ToolResult> + Send,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        (self.f)(args).await
    }
}

/// A catalog entry: schema plus handler
#[derive(Clone)]
pub struct ToolDescriptor {
    schema: ToolSchema,
    handler: Arc<dyn Tool>,
}

impl ToolDescriptor {
    /// Build from a [`Tool`] implementation
    pub fn from_tool<T: Tool + 'static>(tool: T) -> Self {
        Self {
            schema: tool.schema(),
            handler: Arc::new(tool),
        }
    }

    /// Build from an explicit schema and an async closure
    pub fn from_fn<F, Fut>(schema: ToolSchema, f: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let handler = Arc::new(FnTool {
            schema: schema.clone(),
            f,
        });
        Self { schema, handler }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn description(&self) -> &str {
        &self.schema.description
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    /// Validate `arguments` and run the handler
    pub async fn invoke(&self, arguments: &Value) -> ToolResult {
        let args = self.schema.validate(arguments)?;
        self.handler.execute(args).await
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.schema.name)
            .finish_non_exhaustive()
    }
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor; names must be unique
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Register a [`Tool`] implementation
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register(ToolDescriptor::from_tool(tool))
    }

    /// Look a tool up by name
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Validate arguments and invoke the named tool. Never retries.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> ToolResult {
        let tool = self
            .resolve(name)
            .ok_or_else(|| ToolFailure::NotFound(name.to_string()))?;

        tracing::debug!(tool = %name, "Invoking tool");
        tool.invoke(arguments).await
    }

    /// All tool schemas, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Tool names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolDescriptor::name).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_schema() -> ToolSchema {
        ToolSchema::new("echo", "Echo the text back")
            .param(ParameterSchema::required("text", ParamType::String, "Text to echo"))
            .param(
                ParameterSchema::optional("times", ParamType::Integer, "Repetitions")
                    .with_default(json!(1)),
            )
    }

    fn echo() -> ToolDescriptor {
        ToolDescriptor::from_fn(echo_schema(), |args| async move {
            let text = args.str("text")?;
            let times = args.opt_i64("times").unwrap_or(1) as usize;
            Ok::<_, ToolFailure>(ToolOutput::from(text.repeat(times)))
        })
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo()).unwrap();
        let err = catalog.register(echo()).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_resolve() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo()).unwrap();
        assert_eq!(catalog.resolve("echo").map(ToolDescriptor::name), Some("echo"));
        assert!(catalog.resolve("unknown").is_none());
    }

    #[tokio::test]
    async fn test_invoke_applies_defaults_and_coercion() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo()).unwrap();

        let out = catalog.invoke("echo", &json!({"text": "ab"})).await.unwrap();
        assert_eq!(out.to_text(), "ab");

        let out = catalog
            .invoke("echo", &json!({"text": "ab", "times": "3"}))
            .await
            .unwrap();
        assert_eq!(out.to_text(), "ababab");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let catalog = ToolCatalog::new();
        let err = catalog.invoke("nope", &json!({})).await.unwrap_err();
        assert_eq!(err, ToolFailure::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_validation_failure_never_calls_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut catalog = ToolCatalog::new();
        catalog
            .register(ToolDescriptor::from_fn(echo_schema(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::from("ran"))
                }
            }))
            .unwrap();

        let missing = catalog.invoke("echo", &json!({})).await.unwrap_err();
        assert!(matches!(missing, ToolFailure::InvalidArguments { .. }));

        let wrong_type = catalog
            .invoke("echo", &json!({"text": "x", "times": "many"}))
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, ToolFailure::InvalidArguments { .. }));

        let not_object = catalog.invoke("echo", &json!("text")).await.unwrap_err();
        assert!(matches!(not_object, ToolFailure::InvalidArguments { .. }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = echo_schema().validate(&json!({"text": null})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'text'"));
    }

    #[test]
    fn test_enum_values_enforced() {
        let schema = ToolSchema::new("log", "Log").param(
            ParameterSchema::optional("severity", ParamType::String, "Level")
                .with_default(json!("Info"))
                .with_enum(vec![json!("Info"), json!("Warning"), json!("Error")]),
        );
        assert!(schema.validate(&json!({"severity": "Warning"})).is_ok());
        assert!(schema.validate(&json!({"severity": "Loud"})).is_err());
        let args = schema.validate(&json!({})).unwrap();
        assert_eq!(args.opt_str("severity"), Some("Info"));
        assert_eq!(args.into_value(), json!({"severity": "Info"}));
    }

    #[test]
    fn test_coercions() {
        assert_eq!(ParamType::Boolean.coerce(json!("TRUE")).unwrap(), json!(true));
        assert_eq!(ParamType::String.coerce(json!(12)).unwrap(), json!("12"));
        assert_eq!(ParamType::Integer.coerce(json!(4.0)).unwrap(), json!(4));
        assert!(ParamType::Integer.coerce(json!(4.5)).is_err());
        assert!(ParamType::Integer.coerce(json!(1e20)).is_err());
        assert_eq!(ParamType::Integer.coerce(json!(-1e18)).unwrap(), json!(-1_000_000_000_000_000_000_i64));
        assert_eq!(
            ParamType::Object.coerce(json!("{\"a\":1}")).unwrap(),
            json!({"a": 1})
        );
        assert!(ParamType::Array.coerce(json!("{\"a\":1}")).is_err());
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = echo_schema().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["text"]["type"], "string");
        assert_eq!(schema["properties"]["times"]["default"], 1);
        assert_eq!(schema["required"], json!(["text"]));
    }

    #[test]
    fn test_schemas_keep_registration_order() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(ToolDescriptor::from_fn(ToolSchema::new("b", "B"), |_| async {
                Ok(ToolOutput::from(true))
            }))
            .unwrap();
        catalog.register(echo()).unwrap();
        assert_eq!(catalog.names(), vec!["b", "echo"]);
        assert_eq!(catalog.schemas()[1].name, "echo");
    }
}
