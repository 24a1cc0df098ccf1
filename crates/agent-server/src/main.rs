//! Assistant server
//!
//! Two front-ends over the same session driver:
//!
//! - `agent-server serve` (default): Axum REST API and WebSocket streaming
//! - `agent-server console`: interactive terminal chat
//!
//! `agent-server mcp` instead serves the built-in tools to an MCP client on
//! stdin/stdout, with no completion backend involved. Setting
//! `AGENT_MCP_SERVER` to a command line makes the other two modes add that
//! server's tools to their catalog.

mod console;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{ContextStore, LlmProvider, MemoryContextStore, OrchestratorConfig};
use agent_runtime::{McpClient, McpServer, McpServerConfig, OpenAiConfig, OpenAiProvider};

use crate::handlers::{
    chat_handler, chat_stream_handler, clear_context, get_context, health_check, list_models,
    list_tools,
};
use crate::state::AppState;

enum Mode {
    Serve,
    Console,
    Mcp,
}

impl Mode {
    fn from_args() -> anyhow::Result<Self> {
        match std::env::args().nth(1).as_deref() {
            None | Some("serve") => Ok(Mode::Serve),
            Some("console") => Ok(Mode::Console),
            Some("mcp") => Ok(Mode::Mcp),
            Some(other) => anyhow::bail!("unknown mode '{}'; usage: agent-server [serve|console|mcp]", other),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = Mode::from_args()?;

    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing; console and MCP modes keep stdout for themselves
    let default_filter = match mode {
        Mode::Serve => "info,tower_http=debug",
        Mode::Console | Mode::Mcp => "warn",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match mode {
        Mode::Mcp => serve_mcp().await,
        Mode::Console => console::run(agent_state().await?).await,
        Mode::Serve => serve(agent_state().await?).await,
    }
}

/// Backend, tools and session driver for the chat front-ends
async fn agent_state() -> anyhow::Result<AppState> {
    // Initialize LLM provider
    let backend = OpenAiConfig::from_env();
    let mut config = OrchestratorConfig::from_env()?;
    config.generation.model = backend.model.clone();
    if std::env::var_os("AGENT_SYSTEM_PROMPT").is_none() {
        config.system_prompt = assistant_tools::SYSTEM_PROMPT.into();
    }

    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::from_config(backend)?);

    // Verify backend connection
    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to completion backend");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::debug!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Completion backend not reachable - turns will fail");
            tracing::warn!("  Check OPENAI_BASE_URL and OPENAI_API_KEY in .env");
        }
    }
    tracing::info!(model = %config.generation.model, max_tool_rounds = config.max_tool_rounds, "Turn configuration");

    let remote = match McpServerConfig::from_env() {
        Some(mcp) => {
            tracing::info!(command = %mcp.command, "Connecting to MCP server");
            Some(Arc::new(McpClient::spawn(&mcp).await?))
        }
        None => None,
    };

    AppState::build(provider, config, remote).await
}

/// Expose the built-in tools over stdio MCP
async fn serve_mcp() -> anyhow::Result<()> {
    let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());
    let tools = assistant_tools::default_catalog(store)?;
    McpServer::new(Arc::new(tools)).serve_stdio().await?;
    Ok(())
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))

        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        .route("/api/context/{user_id}", get(get_context).delete(clear_context))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 assistant server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                  - Health check");
    tracing::info!("  GET    /api/models              - List available models");
    tracing::info!("  GET    /api/tools               - List registered tools");
    tracing::info!("  POST   /api/chat                - Send message");
    tracing::info!("  GET    /api/chat/stream         - WebSocket streaming");
    tracing::info!("  GET    /api/context/{{user_id}}   - Inspect a user's context");
    tracing::info!("  DELETE /api/context/{{user_id}}   - Clear a user's context");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
