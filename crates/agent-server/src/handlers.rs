//! HTTP/WebSocket Handlers

use std::collections::{HashMap, VecDeque};

use axum::{
    extract::{ws::{Message, WebSocket}, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::{provider::ModelInfo, AgentError, ContextStore, Reply, ToolSchema, TurnControl};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: String,
    pub backend_connected: bool,
    pub tools: usize,
    pub active_users: usize,
    pub busy_users: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub user_id: String,
    pub message: String,
    pub cleared: bool,
}

impl ChatResponse {
    fn new(user_id: String, reply: &Reply) -> Self {
        Self {
            user_id,
            message: reply.text().to_string(),
            cleared: matches!(reply, Reply::ContextCleared),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContextSummary {
    pub user_id: String,
    pub messages: usize,
    pub preferences: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

/// Status and code for a failed turn
fn classify(err: &AgentError) -> (StatusCode, &'static str) {
    match err {
        AgentError::Backend(_) => (StatusCode::BAD_GATEWAY, "BACKEND_FAILURE"),
        AgentError::StreamTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "BACKEND_TIMEOUT"),
        AgentError::ToolChainExceeded(_) => (StatusCode::UNPROCESSABLE_ENTITY, "TOOL_CHAIN_EXCEEDED"),
        AgentError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    }
}

fn resolve_user(user_id: Option<String>) -> String {
    user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.provider.name().to_string(),
        backend_connected,
        tools: state.driver.orchestrator().tools().len(),
        active_users: state.store.user_ids().len(),
        busy_users: state.driver.busy_users(),
    })
}

/// Models offered by the completion backend
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    state.provider.list_models().await.map(Json).map_err(|e| {
        tracing::warn!("Model listing failed: {}", e);
        api_error(StatusCode::BAD_GATEWAY, e.user_message(), "BACKEND_FAILURE")
    })
}

/// Schemas of every registered tool
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.driver.orchestrator().tools().schemas())
}

/// Main chat endpoint (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message must not be empty", "EMPTY_MESSAGE"));
    }
    let user_id = resolve_user(payload.user_id);

    let reply = state.driver.handle(&user_id, &payload.message).await.map_err(|e| {
        tracing::error!(user_id = %user_id, "Agent error: {}", e);
        let (status, code) = classify(&e);
        api_error(status, e.user_message(), code)
    })?;

    Ok(Json(ChatResponse::new(user_id, &reply)))
}

/// Wipe a user's conversation state
pub async fn clear_context(State(state): State<AppState>, Path(user_id): Path<String>) -> StatusCode {
    state.driver.clear(&user_id).await;
    StatusCode::NO_CONTENT
}

/// Summary of a user's conversation state
pub async fn get_context(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ContextSummary>, ApiError> {
    let ctx = state
        .store
        .get(&user_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No context for user '{}'", user_id), "NOT_FOUND"))?;

    Ok(Json(ctx.read(|s| ContextSummary {
        user_id: s.user_id.clone(),
        messages: s.history.len(),
        preferences: s.preferences.clone(),
        created_at: s.created_at,
        last_active_at: s.last_active_at,
    })))
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        handle_stream(sender, receiver, state)
    })
}

fn frame(value: &impl Serialize) -> Message {
    let text = serde_json::to_string(value).unwrap_or_else(|e| {
        serde_json::json!({"type": "error", "error": e.to_string()}).to_string()
    });
    Message::Text(text.into())
}

/// Serve chat requests arriving on `receiver` one turn at a time.
///
/// Requests that arrive while a turn is running are queued and answered in
/// arrival order after the current turn's `done` frame.
async fn handle_stream<S, R, E>(mut sender: S, mut receiver: R, state: AppState)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut queued: VecDeque<String> = VecDeque::new();

    loop {
        let text = match queued.pop_front() {
            Some(text) => text,
            None => match receiver.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => continue,
            },
        };

        let request: ChatRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                let error = serde_json::json!({"type": "error", "error": e.to_string(), "code": "BAD_REQUEST"});
                if sender.send(frame(&error)).await.is_err() {
                    break;
                }
                continue;
            }
        };
        let user_id = resolve_user(request.user_id);
        let message = request.message;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let control = TurnControl::new().with_events(tx).with_cancel(cancel.clone());

        let driver = state.driver.clone();
        let turn_user = user_id.clone();
        let turn = tokio::spawn(async move {
            driver.handle_with(&turn_user, &message, &control).await
        });

        // Forward live events until the turn drops its sender. A client that
        // goes away mid-turn cancels it.
        let mut disconnected = false;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if sender.send(frame(&event)).await.is_err() {
                            disconnected = true;
                            break;
                        }
                    }
                    None => break,
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(user_id = %user_id, queued = queued.len() + 1, "Queued request behind running turn");
                        queued.push_back(text.as_str().to_owned());
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => {
                        disconnected = true;
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        if disconnected {
            tracing::info!(user_id = %user_id, "Client disconnected, cancelling turn");
            cancel.cancel();
            let _ = turn.await;
            return;
        }

        let done = match turn.await {
            Ok(Ok(reply)) => {
                let response = ChatResponse::new(user_id, &reply);
                serde_json::json!({
                    "type": "done",
                    "user_id": response.user_id,
                    "message": response.message,
                    "cleared": response.cleared,
                })
            }
            Ok(Err(e)) => {
                let (_, code) = classify(&e);
                serde_json::json!({"type": "error", "error": e.user_message(), "code": code})
            }
            Err(e) => {
                tracing::error!("Turn task failed: {}", e);
                serde_json::json!({"type": "error", "error": "An unexpected error occurred.", "code": "AGENT_ERROR"})
            }
        };

        if sender.send(frame(&done)).await.is_err() {
            break;
        }
    }
}
