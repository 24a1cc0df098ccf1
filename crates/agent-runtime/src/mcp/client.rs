//! MCP client and remote tools
//!
//! One connection per server. Requests on a connection are answered in
//! turn; callers queue on the connection lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::tool::ToolArguments;
use agent_core::{Tool, ToolCatalog, ToolFailure, ToolOutput, ToolResult, ToolSchema};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::{content_text, McpRequest, McpResponse, McpToolDefinition, PROTOCOL_VERSION};

type Reader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// How to launch a stdio MCP server
#[derive(Clone, Debug)]
pub struct McpServerConfig {
    /// Label used in logs and tool categories
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Upper bound for any single request, tool calls included
    pub request_timeout: Duration,
}

impl McpServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// `AGENT_MCP_SERVER` holds a whitespace-separated command line;
    /// unset or blank means no remote tools.
    pub fn from_env() -> Option<Self> {
        let line = std::env::var("AGENT_MCP_SERVER").ok()?;
        let mut parts = line.split_whitespace().map(str::to_string);
        let command = parts.next()?;
        let mut config = Self::stdio("mcp", command, parts.collect());

        if let Some(name) = std::env::var("AGENT_MCP_SERVER_NAME").ok().filter(|n| !n.trim().is_empty()) {
            config.name = name;
        }
        if let Some(secs) = std::env::var("AGENT_MCP_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }
        Some(config)
    }
}

/// Result of a `tools/call`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallToolResult {
    pub text: String,
    pub is_error: bool,
}

struct Connection {
    writer: Writer,
    reader: Reader,
}

/// An initialized connection to one MCP server
pub struct McpClient {
    name: String,
    connection: Mutex<Connection>,
    next_id: AtomicU64,
    request_timeout: Duration,
    // Killed when the client is dropped.
    _child: Option<Child>,
}

impl McpClient {
    /// Launch the server process and complete the handshake
    pub async fn spawn(config: &McpServerConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Mcp(format!("failed to start '{}': {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Mcp("server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Mcp("server stdout unavailable".into()))?;

        let mut client = Self::new(&config.name, stdout, stdin, config.request_timeout);
        client._child = Some(child);
        client.initialize().await?;
        Ok(client)
    }

    /// Handshake over an already-open byte stream
    pub async fn connect<R, W>(name: &str, reader: R, writer: W, request_timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client = Self::new(name, reader, writer, request_timeout);
        client.initialize().await?;
        Ok(client)
    }

    fn new<R, W>(name: &str, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            name: name.to_string(),
            connection: Mutex::new(Connection {
                writer: Box::new(writer),
                reader: BufReader::new(reader).lines(),
            }),
            next_id: AtomicU64::new(1),
            request_timeout,
            _child: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "tool-agent", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(mcp = %self.name, server = %server, "MCP server initialized");

        self.notify("notifications/initialized").await
    }

    /// Every tool the server offers, following pagination
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let mut result = self.request("tools/list", params).await?;
            let page: Vec<McpToolDefinition> =
                serde_json::from_value(result.get_mut("tools").map(Value::take).unwrap_or_default())?;
            tools.extend(page);

            cursor = result.get("nextCursor").and_then(Value::as_str).map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(CallToolResult {
            text: content_text(&result),
            is_error: result.get("isError").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let mut connection = self.connection.lock().await;
        write_message(&mut connection.writer, &McpRequest::notification(method)).await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = McpRequest::new(id, method).with_params(params);

        let mut connection = self.connection.lock().await;
        write_message(&mut connection.writer, &request).await?;
        debug!(mcp = %self.name, id, method = %method, "MCP request sent");

        let response = tokio::time::timeout(self.request_timeout, read_response(&mut connection.reader, id))
            .await
            .map_err(|_| {
                AgentError::Mcp(format!("{} timed out after {:?}", method, self.request_timeout))
            })??;

        match (response.result, response.error) {
            (_, Some(error)) => Err(AgentError::Mcp(format!("{} failed ({}): {}", method, error.code, error.message))),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

async fn write_message(writer: &mut Writer, request: &McpRequest) -> Result<()> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read until the response to `id`; server notifications and stale replies
/// to timed-out requests are skipped.
async fn read_response(reader: &mut Reader, id: u64) -> Result<McpResponse> {
    loop {
        let line = reader
            .next_line()
            .await?
            .ok_or_else(|| AgentError::Mcp("server closed the connection".into()))?;
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable MCP message");
                continue;
            }
        };
        if message.get("id").and_then(Value::as_u64) != Some(id) || message.get("method").is_some() {
            trace!(message = %line, "Skipping unrelated MCP message");
            continue;
        }
        return Ok(serde_json::from_value(message)?);
    }
}

/// A catalog entry whose handler runs on an MCP server
pub struct RemoteTool {
    client: Arc<McpClient>,
    schema: ToolSchema,
}

impl RemoteTool {
    pub fn new(client: Arc<McpClient>, definition: &McpToolDefinition) -> Self {
        let schema = definition
            .to_schema()
            .category(format!("mcp:{}", client.name()));
        Self { client, schema }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: ToolArguments) -> ToolResult {
        let name = &self.schema.name;
        let result = self
            .client
            .call_tool(name, args.into_value())
            .await
            .map_err(|e| ToolFailure::execution(name, e))?;

        if result.is_error {
            Err(ToolFailure::execution(name, result.text))
        } else {
            Ok(ToolOutput::from(result.text))
        }
    }
}

/// Add the server's tools to `catalog`. Names already taken by local tools
/// keep the local tool. Returns how many were added.
pub async fn register_remote_tools(catalog: &mut ToolCatalog, client: Arc<McpClient>) -> Result<usize> {
    let definitions = client.list_tools().await?;
    let mut added = 0;
    for definition in &definitions {
        if catalog.resolve(&definition.name).is_some() {
            warn!(mcp = %client.name(), tool = %definition.name, "Remote tool shadowed by a local tool");
            continue;
        }
        catalog.register_tool(RemoteTool::new(client.clone(), definition))?;
        added += 1;
    }
    info!(mcp = %client.name(), added, offered = definitions.len(), "Registered remote tools");
    Ok(added)
}
