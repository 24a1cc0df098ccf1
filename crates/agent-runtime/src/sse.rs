//! Chat-completions SSE decoding
//!
//! Turns the raw bytes of a streaming `/chat/completions` response into
//! [`CompletionEvent`]s. Text deltas are emitted as soon as their line is
//! complete; tool calls arrive as fragments keyed by `index` and are only
//! emitted, in index order, once the choice reports a `finish_reason` or the
//! stream ends.

use std::collections::BTreeMap;

use agent_core::message::ToolCallRequest;
use agent_core::provider::CompletionEvent;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// A single SSE `data: {...}` chunk
#[derive(Debug, Deserialize)]
pub(crate) struct StreamResponse {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call fragment; `id` and `name` usually only on the first one
#[derive(Debug, Deserialize)]
pub(crate) struct StreamToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_request(self) -> ToolCallRequest {
        let raw = self.arguments.trim();
        let arguments = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            // Unparseable argument text is passed on as a string; the catalog
            // rejects it and the model gets to see why.
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(self.arguments.clone()))
        };
        ToolCallRequest::new(self.id, self.name, arguments)
    }
}

/// Incremental decoder for one streamed round
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the round has ended (`RoundComplete` was emitted)
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw bytes; returns the events completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<CompletionEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            if self.finished {
                self.buffer.clear();
                break;
            }
            let line: String = self.buffer.drain(..=line_end).collect();
            self.handle_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }
        events
    }

    /// The body ended; flush whatever is pending
    pub fn finish(&mut self) -> Vec<CompletionEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.handle_line(rest.trim_end_matches(['\r', '\n']), &mut events);
        }
        if !self.finished {
            self.complete_round(&mut events);
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<CompletionEvent>) {
        // Blank separators and `:` comments carry nothing.
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.complete_round(events);
            return;
        }

        let response: StreamResponse = match serde_json::from_str(data) {
            Ok(response) => response,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return;
            }
        };

        let Some(choice) = response.choices.into_iter().next() else {
            return;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(CompletionEvent::TextDelta { text });
        }

        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                acc.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        if choice.finish_reason.is_some() {
            self.complete_round(events);
        }
    }

    fn complete_round(&mut self, events: &mut Vec<CompletionEvent>) {
        if self.finished {
            return;
        }
        let calls = std::mem::take(&mut self.calls);
        events.extend(
            calls
                .into_values()
                .map(|acc| CompletionEvent::ToolCallRequested(acc.into_request())),
        );
        events.push(CompletionEvent::RoundComplete);
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(body: &str) -> Vec<CompletionEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(body.as_bytes());
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_text_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        assert_eq!(
            decode(body),
            vec![
                CompletionEvent::text("Hel"),
                CompletionEvent::text("lo"),
                CompletionEvent::RoundComplete,
            ]
        );
    }

    #[test]
    fn test_fragmented_tool_calls_in_index_order() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"log_message\",\"arguments\":\"{\\\"mess\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"age\\\": \\\"X\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\"{\\\"city\\\":\\\"London\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
        );
        let events = decode(body);
        assert_eq!(
            events,
            vec![
                CompletionEvent::ToolCallRequested(ToolCallRequest::new(
                    "call_a",
                    "log_message",
                    json!({"message": "X"})
                )),
                CompletionEvent::ToolCallRequested(ToolCallRequest::new(
                    "call_b",
                    "get_weather",
                    json!({"city": "London"})
                )),
                CompletionEvent::RoundComplete,
            ]
        );
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let events = decoder.push(b"tent\":\"Hi\"}}]}\r\n");
        assert_eq!(events, vec![CompletionEvent::text("Hi")]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_malformed_and_empty_arguments() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"a\",\"function\":{\"name\":\"x\",\"arguments\":\"{not json\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"b\",\"function\":{\"name\":\"y\"}}]}}]}\n",
            "data: [DONE]\n",
        );
        let events = decode(body);
        let CompletionEvent::ToolCallRequested(first) = &events[0] else {
            panic!("expected a tool call");
        };
        let CompletionEvent::ToolCallRequested(second) = &events[1] else {
            panic!("expected a tool call");
        };
        assert_eq!(first.arguments, json!("{not json"));
        assert_eq!(second.arguments, json!({}));
    }

    #[test]
    fn test_comments_and_garbage_are_ignored() {
        let body = ": keep-alive\n\nevent: ping\ndata: not-json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n";
        assert_eq!(
            decode(body),
            vec![CompletionEvent::text("ok"), CompletionEvent::RoundComplete]
        );
    }

    #[test]
    fn test_body_end_without_done_still_completes() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}";
        assert_eq!(
            decode(body),
            vec![CompletionEvent::text("partial"), CompletionEvent::RoundComplete]
        );
    }

    #[test]
    fn test_nothing_after_round_complete() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            "data: [DONE]\n",
        );
        assert_eq!(decode(body), vec![CompletionEvent::RoundComplete]);
    }
}
