//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` for any endpoint speaking the
//! `/chat/completions` protocol with streaming and function calling: OpenAI,
//! Ollama (`/v1`), vLLM, OpenRouter and friends.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{CompletionEvent, CompletionStream, GenerationOptions, LlmProvider, ModelInfo},
    tool::ToolSchema,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::sse::SseDecoder;

/// Provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL including the version prefix, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Bearer token; local servers usually accept anything
    pub api_key: Option<String>,

    /// Default model for generation
    pub model: String,

    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl OpenAiConfig {
    /// `OPENAI_BASE_URL`, `OPENAI_API_KEY`, `OPENAI_MODEL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            ..defaults
        }
    }

    /// Local Ollama through its OpenAI-compatible endpoint
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: model.into(),
            ..Self::default()
        }
    }
}

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        // No overall request timeout: a streamed answer may legitimately take
        // minutes. Idle time between events is bounded by the orchestrator.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: OpenAiConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env())
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert agent messages to the wire format
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls: Vec<ApiToolCall> = m
                    .tool_calls
                    .iter()
                    .map(|call| ApiToolCall {
                        id: call.id.clone(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: call.tool_name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect();

                // An assistant message that only calls tools has no content.
                let content = if m.role == Role::Assistant && m.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };

                ApiMessage {
                    role: m.role.to_string(),
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool schemas to the wire format
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.json_schema(),
                },
            })
            .collect()
    }

    fn request_body(messages: &[Message], tools: &[ToolSchema], options: &GenerationOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": Self::to_api_messages(messages),
            "temperature": options.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !options.stop_sequences.is_empty() {
            body["stop"] = json!(options.stop_sequences);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(tools));
        }

        body
    }
}

/// Failure cause reported for a rejected completion request
fn failure_cause(status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => "authentication failed: invalid API key or insufficient permissions".to_string(),
        429 => "rate limited by the completion backend".to_string(),
        code => format!("HTTP {}: {}", code, body.trim()),
    }
}

/// Drive one streamed request, forwarding decoded events until the round ends
/// or the receiver goes away.
async fn pump(request: reqwest::RequestBuilder, tx: mpsc::UnboundedSender<CompletionEvent>) {
    let response = tokio::select! {
        _ = tx.closed() => return,
        response = request.send() => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(CompletionEvent::failed(format!("request failed: {}", e)));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Completion request rejected");
        let _ = tx.send(CompletionEvent::failed(failure_cause(status, &body)));
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return,
            chunk = bytes.next() => chunk,
        };

        let events = match chunk {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => {
                let _ = tx.send(CompletionEvent::failed(format!("stream interrupted: {}", e)));
                return;
            }
            None => decoder.finish(),
        };

        for event in events {
            if tx.send(event).is_err() {
                return;
            }
        }

        if decoder.is_finished() {
            return;
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Completion backend health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AgentError::Backend(e.to_string()))?
            .error_for_status()
            .map_err(|e| AgentError::Backend(e.to_string()))?;

        let models: ApiModelList = response
            .json()
            .await
            .map_err(|e| AgentError::Backend(e.to_string()))?;

        Ok(models
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                owned_by: m.owned_by,
            })
            .collect())
    }

    fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> CompletionStream {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = Self::request_body(messages, tools, options);
        debug!(model = %options.model, messages = messages.len(), tools = tools.len(), "Sending streaming request");

        let request = self
            .request(self.client.post(url))
            .header("Accept", "text/event-stream")
            .json(&body);

        // The task stops as soon as the stream is dropped, which drops the
        // response and aborts the HTTP request.
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(request, tx));

        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

// --- Wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiModelList {
    #[serde(default)]
    data: Vec<ApiModel>,
}

#[derive(Debug, Deserialize)]
struct ApiModel {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}
