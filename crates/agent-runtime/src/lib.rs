//! # agent-runtime
//!
//! Completion backends and tool transports for the agent.
//!
//! ## Providers
//!
//! - **OpenAI-compatible**: any `/chat/completions` endpoint with streaming
//!   and function calling (OpenAI, Ollama `/v1`, vLLM, OpenRouter)
//!
//! ## MCP
//!
//! - [`McpServer`] serves a tool catalog over stdio
//! - [`McpClient`] pulls a remote server's tools into a local catalog
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{OpenAiConfig, OpenAiProvider};
//!
//! let provider = OpenAiProvider::from_config(OpenAiConfig::ollama("llama3.2"))?;
//! let orchestrator = OrchestratorBuilder::new()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

pub mod mcp;
pub mod openai;
pub mod sse;

pub use mcp::{McpClient, McpServer, McpServerConfig};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use sse::SseDecoder;
