//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for completion backends (OpenAI-compatible
//! endpoints, Ollama, test scripts) so the turn orchestrator never depends on
//! backend specifics.
//!
//! A provider turns a message list plus the tool schemas into a lazy
//! [`CompletionStream`] of [`CompletionEvent`]s for one backend round. The
//! stream is finite, single-consumer and not restartable; dropping it cancels
//! the underlying request.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{CompletionEvent, LlmProvider};
//! use futures::StreamExt;
//!
//! let mut events = provider.stream(&messages, &catalog.schemas(), &options);
//! while let Some(event) = events.next().await {
//!     match event {
//!         CompletionEvent::TextDelta { text } => print!("{text}"),
//!         CompletionEvent::RoundComplete => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSchema;

pub mod scripted;

pub use scripted::ScriptedProvider;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "llama3.2")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Top-p nucleus sampling
    #[serde(default)]
    pub top_p: Option<f32>,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 { 0.7 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: default_temperature(),
            max_tokens: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// One event of a backend round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// Incremental assistant text, in emission order
    TextDelta { text: String },

    /// The model wants a tool executed
    ToolCallRequested(ToolCallRequest),

    /// The round ended; pending tool calls must be resolved now
    RoundComplete,

    /// The backend failed mid-stream; nothing follows
    Failed { cause: String },
}

impl CompletionEvent {
    pub fn text(text: impl Into<String>) -> Self {
        CompletionEvent::TextDelta { text: text.into() }
    }

    pub fn failed(cause: impl Into<String>) -> Self {
        CompletionEvent::Failed { cause: cause.into() }
    }
}

/// Stream type for one backend round
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: Option<String>,
}

/// Strategy trait for completion backends
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    /// Start one backend round. Failures are reported in-stream as
    /// [`CompletionEvent::Failed`].
    fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> CompletionStream;
}
