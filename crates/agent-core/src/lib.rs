//! # agent-core
//!
//! Tool-calling conversational agent core: a provider-agnostic completion
//! stream abstraction, a validated tool catalog, per-user conversation state
//! and the turn orchestrator that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionDriver                          │
//! │  ┌──────────────┐   ┌───────────────────────────────────┐    │
//! │  │ ContextStore │   │           Orchestrator            │    │
//! │  │  (per user)  │   │  ┌─────────────┐  ┌─────────────┐ │    │
//! │  └──────────────┘   │  │ ToolCatalog │  │ LlmProvider │ │    │
//! │                     │  └─────────────┘  │ (Strategy)  │ │    │
//! │                     │                   └─────────────┘ │    │
//! │                     └───────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between OpenAI-compatible
//! endpoints, local servers or a scripted backend without changing the turn
//! logic.

pub mod context;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod tool;

pub use context::{ContextStore, ConversationState, MemoryContextStore};
pub use error::{AgentError, Result};
pub use message::{Message, Role, ToolCallRequest};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig, TurnControl, TurnEvent, TurnOutcome};
pub use provider::{CompletionEvent, CompletionStream, GenerationOptions, LlmProvider};
pub use session::{Reply, SessionDriver};
pub use tool::{Tool, ToolCatalog, ToolDescriptor, ToolFailure, ToolOutput, ToolResult, ToolSchema};
