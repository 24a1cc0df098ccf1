//! Application State

use std::sync::Arc;

use agent_core::{
    ContextStore, LlmProvider, MemoryContextStore, Orchestrator, OrchestratorConfig, SessionDriver, ToolCatalog,
};
use agent_runtime::mcp::{register_remote_tools, McpClient};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Runs turns and owns the per-user gates
    pub driver: Arc<SessionDriver>,

    /// Completion backend (for health and model listing)
    pub provider: Arc<dyn LlmProvider>,

    /// Per-user conversation state
    pub store: Arc<dyn ContextStore>,
}

impl AppState {
    /// Wire the store, the tools and the orchestrator together.
    ///
    /// Tools from `remote` join the built-in ones; a built-in tool keeps its
    /// name when both offer it.
    pub async fn build(
        provider: Arc<dyn LlmProvider>,
        config: OrchestratorConfig,
        remote: Option<Arc<McpClient>>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());
        let mut tools = assistant_tools::default_catalog(store.clone())?;
        let local = tools.len();

        if let Some(client) = remote {
            register_remote_tools(&mut tools, client).await?;
        }
        log_catalog(&tools, local);

        let orchestrator = Orchestrator::new(provider.clone(), Arc::new(tools), config);

        Ok(Self {
            driver: Arc::new(SessionDriver::new(store.clone(), Arc::new(orchestrator))),
            provider,
            store,
        })
    }
}

fn log_catalog(tools: &ToolCatalog, local: usize) {
    tracing::info!("Registered {} tools ({} local, {} via MCP):", tools.len(), local, tools.len() - local);
    for schema in tools.schemas() {
        match schema.category.as_deref() {
            Some(source) if source.starts_with("mcp:") => tracing::info!("  • {} [{}]", schema.name, source),
            _ => tracing::info!("  • {}", schema.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agent_core::provider::scripted::{ScriptedProvider, ScriptedRound};
    use agent_core::{ToolDescriptor, ToolOutput, ToolSchema};
    use agent_runtime::McpServer;

    async fn remote_client() -> Arc<McpClient> {
        let mut remote = ToolCatalog::new();
        for name in ["get_weather", "translate"] {
            remote
                .register(ToolDescriptor::from_fn(ToolSchema::new(name, "Remote"), move |_| async move {
                    Ok(ToolOutput::from(format!("remote {}", name)))
                }))
                .unwrap();
        }

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        tokio::spawn(async move {
            let _ = McpServer::new(Arc::new(remote)).serve(server_read, server_write).await;
        });
        let (read, write) = tokio::io::split(client_io);
        Arc::new(McpClient::connect("remote", read, write, Duration::from_secs(5)).await.unwrap())
    }

    #[tokio::test]
    async fn test_remote_tools_extend_builtin_catalog() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::text(&["ok"])]));
        let state = AppState::build(provider, OrchestratorConfig::default(), Some(remote_client().await))
            .await
            .unwrap();

        let tools = state.driver.orchestrator().tools();
        let builtin = assistant_tools::default_catalog(state.store.clone()).unwrap();
        assert_eq!(tools.len(), builtin.len() + 1);

        let translate = tools.invoke("translate", &serde_json::json!({})).await.unwrap();
        assert_eq!(translate.to_text(), "remote translate");

        // The built-in weather tool wins the name.
        let weather = tools.resolve("get_weather").unwrap();
        assert_eq!(weather.schema().category, builtin.resolve("get_weather").unwrap().schema().category);
        assert_ne!(weather.schema().category.as_deref(), Some("mcp:remote"));
    }
}
