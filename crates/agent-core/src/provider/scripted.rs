//! Scripted provider
//!
//! Deterministic [`LlmProvider`] that replays pre-recorded rounds, for tests
//! of anything that drives turns.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::{CompletionEvent, CompletionStream, GenerationOptions, LlmProvider};
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSchema;

/// One scripted backend round
#[derive(Clone, Debug)]
pub struct ScriptedRound {
    events: Vec<CompletionEvent>,
    stall: bool,
}

impl ScriptedRound {
    pub fn new(events: Vec<CompletionEvent>) -> Self {
        Self { events, stall: false }
    }

    /// A plain text answer split into the given deltas
    pub fn text(deltas: &[&str]) -> Self {
        let mut events: Vec<_> = deltas.iter().map(|d| CompletionEvent::text(*d)).collect();
        events.push(CompletionEvent::RoundComplete);
        Self::new(events)
    }

    /// A round that requests the given tools (name, arguments)
    pub fn tool_calls(calls: &[(&str, Value)]) -> Self {
        let mut events: Vec<_> = calls
            .iter()
            .map(|(name, args)| {
                CompletionEvent::ToolCallRequested(ToolCallRequest::new(
                    format!("call_{}", uuid::Uuid::new_v4().simple()),
                    *name,
                    args.clone(),
                ))
            })
            .collect();
        events.push(CompletionEvent::RoundComplete);
        Self::new(events)
    }

    /// A round that fails mid-stream after some text
    pub fn failure(partial: &str, cause: &str) -> Self {
        Self::new(vec![CompletionEvent::text(partial), CompletionEvent::failed(cause)])
    }

    /// Emit the events, then never complete
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }
}

/// A request the scripted provider received
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Replays scripted rounds in order
#[derive(Default)]
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    fallback: Option<ScriptedRound>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            ..Self::default()
        }
    }

    /// Round to replay once the script runs out
    pub fn with_fallback(mut self, round: ScriptedRound) -> Self {
        self.fallback = Some(round);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        _options: &GenerationOptions,
    ) -> CompletionStream {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });

        let next = self
            .rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.fallback.clone());

        let Some(round) = next else {
            return Box::pin(stream::iter([CompletionEvent::failed("script exhausted")]));
        };

        let events = stream::iter(round.events);
        if round.stall {
            Box::pin(events.chain(stream::pending()))
        } else {
            Box::pin(events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_rounds_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedRound::tool_calls(&[("log_message", json!({"message": "x"}))]),
            ScriptedRound::text(&["Do", "ne"]),
        ]);
        let opts = GenerationOptions::default();

        let first: Vec<_> = provider.stream(&[], &[], &opts).collect().await;
        assert!(matches!(first[0], CompletionEvent::ToolCallRequested(_)));
        assert_eq!(first[1], CompletionEvent::RoundComplete);

        let second: Vec<_> = provider.stream(&[], &[], &opts).collect().await;
        assert_eq!(second[0], CompletionEvent::text("Do"));

        let third: Vec<_> = provider.stream(&[], &[], &opts).collect().await;
        assert!(matches!(third[0], CompletionEvent::Failed { .. }));
        assert_eq!(provider.call_count(), 3);
    }
}
