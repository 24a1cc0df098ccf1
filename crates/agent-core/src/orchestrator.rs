//! Turn Orchestrator
//!
//! Drives one user turn from new input to a final answer:
//!
//! ```text
//! Idle ─▶ AwaitingCompletion ─▶ Done
//!               ▲   │
//!               │   ▼
//!           ExecutingTools          (any state) ─▶ Failed
//! ```
//!
//! Every backend round is consumed as a stream. Text deltas are forwarded to
//! the caller as they arrive and accumulated into one assistant message per
//! round; tool calls requested in the round are executed in request order once
//! the round completes, and their results are appended as tool messages
//! before the backend is asked again.
//!
//! The orchestrator works on its own copy of the message list. A failed or
//! cancelled turn therefore leaves nothing behind; committing a successful
//! turn is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::message::{Message, ToolCallRequest, tool_results_are_threaded};
use crate::provider::{CompletionEvent, GenerationOptions, LlmProvider};
use crate::tool::{ToolCatalog, ToolFailure, ToolSchema};

/// Placeholder in the system prompt replaced with the current user id
pub const USER_ID_PLACEHOLDER: &str = "{user_id}";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Use the available tools to answer questions and perform actions. \
The current user's id is {user_id}.";

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// System prompt template; `{user_id}` is substituted per turn
    pub system_prompt: String,

    /// Maximum tool-calling rounds per turn
    pub max_tool_rounds: usize,

    /// Longest wait for the next event of a completion stream
    pub stream_idle_timeout: Duration,

    /// Longest a single tool invocation may run
    pub tool_timeout: Duration,

    /// Extra attempts for tool invocations that fail in the handler
    pub tool_retries: u32,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_rounds: 8,
            stream_idle_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            tool_retries: 0,
            generation: GenerationOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Read overrides from the environment
    ///
    /// `AGENT_SYSTEM_PROMPT`, `AGENT_MAX_TOOL_ROUNDS`,
    /// `AGENT_STREAM_TIMEOUT_SECS`, `AGENT_TOOL_TIMEOUT_SECS`,
    /// `AGENT_TOOL_RETRIES`. Unset variables keep their default.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prompt) = std::env::var("AGENT_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        if let Some(rounds) = env_number::<usize>("AGENT_MAX_TOOL_ROUNDS")? {
            if rounds == 0 {
                return Err(AgentError::Config("AGENT_MAX_TOOL_ROUNDS must be at least 1".into()));
            }
            config.max_tool_rounds = rounds;
        }
        if let Some(secs) = env_number::<u64>("AGENT_STREAM_TIMEOUT_SECS")? {
            config.stream_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("AGENT_TOOL_TIMEOUT_SECS")? {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_number::<u32>("AGENT_TOOL_RETRIES")? {
            config.tool_retries = retries;
        }

        Ok(config)
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Live progress of a turn, for display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A backend round started (1-based)
    RoundStarted { round: usize },

    /// Assistant text as it streams in
    TextDelta { text: String },

    /// A tool is about to run
    ToolCallStarted {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished; `output` is what the model will see
    ToolCallFinished {
        id: String,
        name: String,
        success: bool,
        output: String,
    },
}

/// Caller-side controls for one turn
#[derive(Clone, Debug)]
pub struct TurnControl {
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    cancel: CancellationToken,
}

impl Default for TurnControl {
    fn default() -> Self {
        Self {
            events: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl TurnControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward live [`TurnEvent`]s to `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Abort the turn when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            // A receiver that went away only loses the live display.
            let _ = events.send(event);
        }
    }
}

/// Result of a successful turn
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// Prior history plus everything this turn appended (no system prompt)
    pub messages: Vec<Message>,

    /// Final answer text
    pub answer: String,

    /// Backend rounds used
    pub rounds: usize,

    /// Tool calls executed
    pub tool_calls: usize,
}

enum TurnState {
    AwaitingCompletion,
    ExecutingTools(Vec<ToolCallRequest>),
    Done(String),
}

/// What one backend round produced
struct RoundOutput {
    text: String,
    calls: Vec<ToolCallRequest>,
}

/// The turn orchestrator
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolCatalog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    fn system_prompt_for(&self, user_id: &str) -> String {
        self.config.system_prompt.replace(USER_ID_PLACEHOLDER, user_id)
    }

    /// Run one turn for `user_id` on top of `history`.
    pub async fn run(
        &self,
        user_id: &str,
        history: &[Message],
        input: &str,
        control: &TurnControl,
    ) -> Result<TurnOutcome> {
        info!(user_id = %user_id, history = history.len(), "Starting turn");

        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(Message::system(self.system_prompt_for(user_id)));
        messages.extend_from_slice(history);
        messages.push(Message::user(input));

        let schemas = self.tools.schemas();
        let mut call_ids = HashSet::new();
        let mut rounds = 0;
        let mut tool_rounds = 0;
        let mut tool_calls = 0;
        let mut state = TurnState::AwaitingCompletion;

        loop {
            state = match state {
                TurnState::AwaitingCompletion => {
                    rounds += 1;
                    control.emit(TurnEvent::RoundStarted { round: rounds });
                    debug!(user_id = %user_id, round = rounds, "Awaiting completion");

                    let round = self
                        .complete_round(&messages, &schemas, control, &mut call_ids)
                        .await
                        .inspect_err(|e| warn!(user_id = %user_id, round = rounds, error = %e, "Turn failed"))?;

                    if round.calls.is_empty() {
                        messages.push(Message::assistant(round.text.clone()));
                        TurnState::Done(round.text)
                    } else {
                        if tool_rounds == self.config.max_tool_rounds {
                            warn!(
                                user_id = %user_id,
                                cap = self.config.max_tool_rounds,
                                "Tool chain exceeded, abandoning turn"
                            );
                            return Err(AgentError::ToolChainExceeded(self.config.max_tool_rounds));
                        }
                        tool_rounds += 1;
                        messages.push(Message::assistant_with_calls(round.text, round.calls.clone()));
                        TurnState::ExecutingTools(round.calls)
                    }
                }

                TurnState::ExecutingTools(calls) => {
                    for call in &calls {
                        let output = self.execute_call(call, control).await?;
                        messages.push(Message::tool_result(call, output));
                        tool_calls += 1;
                    }
                    TurnState::AwaitingCompletion
                }

                TurnState::Done(answer) => {
                    let messages = messages.split_off(1);
                    debug_assert!(tool_results_are_threaded(&messages));
                    info!(user_id = %user_id, rounds, tool_calls, "Turn complete");
                    return Ok(TurnOutcome {
                        messages,
                        answer,
                        rounds,
                        tool_calls,
                    });
                }
            };
        }
    }

    /// Consume one backend round
    async fn complete_round(
        &self,
        messages: &[Message],
        schemas: &[ToolSchema],
        control: &TurnControl,
        call_ids: &mut HashSet<String>,
    ) -> Result<RoundOutput> {
        let idle = self.config.stream_idle_timeout;
        let mut stream = self.provider.stream(messages, schemas, &self.config.generation);
        let mut text = String::new();
        let mut calls = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => return Err(AgentError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(AgentError::Backend(
                        "completion stream ended before the round completed".into(),
                    ));
                }
                Err(_) => return Err(AgentError::StreamTimeout(idle)),
            };

            match event {
                CompletionEvent::TextDelta { text: delta } => {
                    text.push_str(&delta);
                    control.emit(TurnEvent::TextDelta { text: delta });
                }
                CompletionEvent::ToolCallRequested(mut call) => {
                    if call.id.is_empty() || !call_ids.insert(call.id.clone()) {
                        call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                        call_ids.insert(call.id.clone());
                    }
                    debug!(tool = %call.tool_name, id = %call.id, "Tool call requested");
                    calls.push(call);
                }
                CompletionEvent::RoundComplete => return Ok(RoundOutput { text, calls }),
                CompletionEvent::Failed { cause } => return Err(AgentError::Backend(cause)),
            }
        }
    }

    /// Run one tool call; failures become the text the model sees
    async fn execute_call(&self, call: &ToolCallRequest, control: &TurnControl) -> Result<String> {
        control.emit(TurnEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        });

        let limit = self.config.tool_timeout;
        let mut attempt = 0;

        let result = loop {
            let invocation =
                tokio::time::timeout(limit, self.tools.invoke(&call.tool_name, &call.arguments));

            let result = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => return Err(AgentError::Cancelled),
                result = invocation => result.unwrap_or_else(|_| {
                    Err(ToolFailure::execution(&call.tool_name, format!("timed out after {:?}", limit)))
                }),
            };

            match result {
                Err(failure) if failure.is_retryable() && attempt < self.config.tool_retries => {
                    attempt += 1;
                    warn!(tool = %call.tool_name, attempt, error = %failure, "Retrying tool");
                }
                other => break other,
            }
        };

        let (output, success) = match result {
            Ok(output) => (output.to_text(), true),
            Err(failure) => {
                warn!(tool = %call.tool_name, id = %call.id, error = %failure, "Tool failed");
                (format!("Error: {}", failure), false)
            }
        };

        control.emit(TurnEvent::ToolCallFinished {
            id: call.id.clone(),
            name: call.tool_name.clone(),
            success,
            output: output.clone(),
        });

        Ok(output)
    }

    /// Get the tool catalog
    pub fn tools(&self) -> &ToolCatalog {
        &self.tools
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolCatalog,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolCatalog::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: ToolCatalog) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn max_tool_rounds(mut self, max: usize) -> Self {
        self.config.max_tool_rounds = max;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream_idle_timeout = timeout;
        self
    }

    pub fn tool_retries(mut self, retries: u32) -> Self {
        self.config.tool_retries = retries;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.config.max_tool_rounds == 0 {
            return Err(AgentError::Config("max_tool_rounds must be at least 1".into()));
        }

        Ok(Orchestrator::new(provider, Arc::new(self.tools), self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::scripted::{ScriptedProvider, ScriptedRound};
    use crate::tool::{ParamType, ParameterSchema, ToolDescriptor, ToolOutput};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> ToolCatalog {
        let mut tools = ToolCatalog::new();
        tools
            .register(ToolDescriptor::from_fn(
                ToolSchema::new("echo", "Echo text")
                    .param(ParameterSchema::required("text", ParamType::String, "Text")),
                |args| async move {
                    let text = args.str("text")?;
                    Ok::<_, ToolFailure>(ToolOutput::from(format!("echo: {}", text)))
                },
            ))
            .unwrap();
        tools
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, tools: ToolCatalog) -> Orchestrator {
        OrchestratorBuilder::new()
            .provider(provider)
            .tools(tools)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::text(&["Hel", "lo", "!"])]));
        let orch = orchestrator(provider.clone(), catalog());

        let history = vec![Message::user("earlier"), Message::assistant("reply")];
        let outcome = orch.run("u1", &history, "hi", &TurnControl::new()).await.unwrap();

        assert_eq!(outcome.answer, "Hello!");
        assert_eq!(outcome.messages.len(), history.len() + 2);
        assert_eq!(outcome.messages[2].role, Role::User);
        assert_eq!(outcome.messages[3].content, "Hello!");
        assert_eq!(outcome.rounds, 1);

        let sent = &provider.requests()[0];
        assert_eq!(sent.messages[0].role, Role::System);
        assert!(sent.messages[0].content.contains("u1"));
        assert_eq!(sent.tools, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_single_tool_call_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::tool_calls(&[("echo", json!({"text": "ping"}))]),
            ScriptedRound::text(&["pong"]),
        ]));
        let orch = orchestrator(provider.clone(), catalog());

        let outcome = orch.run("u1", &[], "ping me", &TurnControl::new()).await.unwrap();
        assert_eq!(outcome.messages.len(), 4);

        let assistant = &outcome.messages[1];
        let tool = &outcome.messages[2];
        assert_eq!(assistant.tool_calls.len(), 1);
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some(assistant.tool_calls[0].id.as_str()));
        assert_eq!(tool.content, "echo: ping");
        assert_eq!(outcome.tool_calls, 1);

        // The second round saw the call and its result.
        let second = &provider.requests()[1];
        assert!(tool_results_are_threaded(&second.messages));
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_tool_failure_is_shown_to_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::tool_calls(&[("missing_tool", json!({})), ("echo", json!({}))]),
            ScriptedRound::text(&["sorry"]),
        ]));
        let orch = orchestrator(provider, catalog());

        let outcome = orch.run("u1", &[], "go", &TurnControl::new()).await.unwrap();
        assert!(outcome.messages[2].content.starts_with("Error: Tool not found"));
        assert!(outcome.messages[3].content.contains("missing required parameter"));
        assert_eq!(outcome.answer, "sorry");
    }

    #[tokio::test]
    async fn test_backend_failure_fails_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::failure("par", "quota exceeded")]));
        let orch = orchestrator(provider, catalog());

        let err = orch.run("u1", &[], "hi", &TurnControl::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(cause) if cause == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_stream_without_round_end_fails() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::new(vec![
            CompletionEvent::text("half"),
        ])]));
        let orch = orchestrator(provider, catalog());

        let err = orch.run("u1", &[], "hi", &TurnControl::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(_)));
    }

    #[tokio::test]
    async fn test_tool_chain_cap() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .with_fallback(ScriptedRound::tool_calls(&[("echo", json!({"text": "again"}))])),
        );
        let orch = OrchestratorBuilder::new()
            .provider(provider.clone())
            .tools(catalog())
            .max_tool_rounds(3)
            .build()
            .unwrap();

        let err = orch.run("u1", &[], "loop", &TurnControl::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolChainExceeded(3)));
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_call_ids_are_replaced() {
        let call = |id: &str| {
            CompletionEvent::ToolCallRequested(ToolCallRequest::new(id, "echo", json!({"text": "x"})))
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::new(vec![call("a"), call("a"), call(""), CompletionEvent::RoundComplete]),
            ScriptedRound::text(&["ok"]),
        ]));
        let orch = orchestrator(provider, catalog());

        let outcome = orch.run("u1", &[], "go", &TurnControl::new()).await.unwrap();
        let ids: HashSet<_> = outcome.messages[1].tool_calls.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("a"));
        assert!(tool_results_are_threaded(&outcome.messages));
    }

    #[tokio::test]
    async fn test_events_are_forwarded_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::new(vec![
                CompletionEvent::text("Checking. "),
                CompletionEvent::ToolCallRequested(ToolCallRequest::new("c1", "echo", json!({"text": "t"}))),
                CompletionEvent::RoundComplete,
            ]),
            ScriptedRound::text(&["Done"]),
        ]));
        let orch = orchestrator(provider, catalog());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch
            .run("u1", &[], "go", &TurnControl::new().with_events(tx))
            .await
            .unwrap();
        assert_eq!(outcome.messages[1].content, "Checking. ");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                TurnEvent::RoundStarted { round: 1 },
                TurnEvent::TextDelta { text: "Checking. ".into() },
                TurnEvent::ToolCallStarted {
                    id: "c1".into(),
                    name: "echo".into(),
                    arguments: json!({"text": "t"}),
                },
                TurnEvent::ToolCallFinished {
                    id: "c1".into(),
                    name: "echo".into(),
                    success: true,
                    output: "echo: t".into(),
                },
                TurnEvent::RoundStarted { round: 2 },
                TurnEvent::TextDelta { text: "Done".into() },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_is_a_tool_error() {
        let mut tools = ToolCatalog::new();
        tools
            .register(ToolDescriptor::from_fn(ToolSchema::new("slow", "Never returns"), |_| async {
                std::future::pending::<()>().await;
                Ok::<_, ToolFailure>(ToolOutput::from("unreachable"))
            }))
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::tool_calls(&[("slow", json!({}))]),
            ScriptedRound::text(&["gave up"]),
        ]));
        let orch = OrchestratorBuilder::new()
            .provider(provider)
            .tools(tools)
            .tool_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let outcome = orch.run("u1", &[], "go", &TurnControl::new()).await.unwrap();
        assert!(outcome.messages[2].content.contains("timed out"));
        assert_eq!(outcome.answer, "gave up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::new(vec![CompletionEvent::text("...")]).stalled(),
        ]));
        let orch = OrchestratorBuilder::new()
            .provider(provider)
            .tools(catalog())
            .stream_idle_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = orch.run("u1", &[], "hi", &TurnControl::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::StreamTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::new(vec![CompletionEvent::text("...")]).stalled(),
        ]));
        let orch = orchestrator(provider, catalog());
        let cancel = CancellationToken::new();
        let control = TurnControl::new().with_cancel(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = orch.run("u1", &[], "hi", &control).await.unwrap_err();
        trigger.await.unwrap();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_retries_handler_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut tools = ToolCatalog::new();
        tools
            .register(ToolDescriptor::from_fn(ToolSchema::new("flaky", "Fails once"), move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ToolFailure::execution("flaky", "connection reset"))
                    } else {
                        Ok(ToolOutput::from("ok"))
                    }
                }
            }))
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::tool_calls(&[("flaky", json!({}))]),
            ScriptedRound::text(&["fine"]),
        ]));
        let orch = OrchestratorBuilder::new()
            .provider(provider)
            .tools(tools)
            .tool_retries(1)
            .build()
            .unwrap();

        let outcome = orch.run("u1", &[], "go", &TurnControl::new()).await.unwrap();
        assert_eq!(outcome.messages[2].content, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            OrchestratorBuilder::new().build(),
            Err(AgentError::Config(_))
        ));
    }
}
