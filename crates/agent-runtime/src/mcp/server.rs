//! MCP server over a tool catalog

use std::sync::Arc;

use agent_core::{error::Result, ToolCatalog, ToolFailure};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::{codes, McpRequest, McpResponse, McpToolDefinition, PROTOCOL_VERSION};

/// Serves every tool of a catalog to one MCP client
pub struct McpServer {
    catalog: Arc<ToolCatalog>,
    name: String,
    version: String,
}

impl McpServer {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            name: "assistant-tools".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Serve on the process's stdin/stdout until the client hangs up
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Answer one JSON-RPC message per line until `reader` ends
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.name, tools = self.catalog.len(), "MCP server ready");
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }

        info!(server = %self.name, "MCP client disconnected");
        Ok(())
    }

    /// Response to one raw message; notifications get none
    pub async fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Some(McpResponse::failure(Value::Null, codes::PARSE_ERROR, e.to_string()));
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(McpResponse::failure(id, codes::INVALID_REQUEST, e.to_string())),
        }
    }

    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "MCP notification");
            return None;
        };
        let params = request.params.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => McpResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": self.name, "version": self.version },
                }),
            ),
            "ping" => McpResponse::success(id, json!({})),
            "tools/list" => {
                let tools: Vec<McpToolDefinition> = self
                    .catalog
                    .schemas()
                    .iter()
                    .map(McpToolDefinition::from_schema)
                    .collect();
                McpResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => self.call_tool(id, &params).await,
            other => {
                warn!(method = %other, "Unsupported MCP method");
                McpResponse::failure(id, codes::METHOD_NOT_FOUND, format!("Method not found: {}", other))
            }
        };
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: &Value) -> McpResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return McpResponse::failure(id, codes::INVALID_PARAMS, "tools/call needs a tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        // Tool failures are results the caller's model should see; only an
        // unknown tool is a protocol error.
        let (text, is_error) = match self.catalog.invoke(name, &arguments).await {
            Ok(output) => (output.to_text(), false),
            Err(ToolFailure::NotFound(name)) => {
                return McpResponse::failure(id, codes::INVALID_PARAMS, format!("Unknown tool: {}", name));
            }
            Err(failure) => (failure.to_string(), true),
        };
        debug!(tool = %name, is_error, "MCP tool call finished");

        McpResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::{ParamType, ParameterSchema};
    use agent_core::{ToolDescriptor, ToolOutput, ToolSchema};

    fn server() -> McpServer {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(ToolDescriptor::from_fn(
                ToolSchema::new("echo", "Echo the text back")
                    .param(ParameterSchema::required("text", ParamType::String, "Text")),
                |args| async move { Ok::<_, ToolFailure>(ToolOutput::from(args.str("text")?.to_string())) },
            ))
            .unwrap();
        McpServer::new(Arc::new(catalog))
    }

    async fn call(server: &McpServer, line: &str) -> Value {
        let response = server.handle_line(line).await.unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let server = server();
        let init = call(&server, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(init["result"]["capabilities"]["tools"].is_object());

        let list = call(&server, r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#).await;
        assert_eq!(list["id"], "two");
        assert_eq!(list["result"]["tools"][0]["name"], "echo");
        assert_eq!(list["result"]["tools"][0]["inputSchema"]["required"][0], "text");
    }

    #[tokio::test]
    async fn test_tool_call_results() {
        let server = server();
        let ok = call(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#,
        )
        .await;
        assert_eq!(ok["result"]["content"][0]["text"], "hi");
        assert_eq!(ok["result"]["isError"], false);

        let invalid = call(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#,
        )
        .await;
        assert_eq!(invalid["result"]["isError"], true);
        let text = invalid["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("missing required parameter 'text'"));

        let unknown = call(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(unknown["error"]["code"], codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();
        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());

        let parse = call(&server, "{not json").await;
        assert_eq!(parse["error"]["code"], codes::PARSE_ERROR);
        assert!(parse["id"].is_null());

        let missing_method = call(&server, r#"{"jsonrpc":"2.0","id":6}"#).await;
        assert_eq!(missing_method["error"]["code"], codes::INVALID_REQUEST);
        assert_eq!(missing_method["id"], 6);

        let unknown = call(&server, r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#).await;
        assert_eq!(unknown["error"]["code"], codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_answers_line_by_line() {
        let server = server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
    }
}
