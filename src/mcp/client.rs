//! MCP (Model Context Protocol) client for external tool servers.
//!
//! An external protocol server is a long-running process that speaks
//! JSON-RPC 2.0 over stdin/stdout. On start-up, the client completes the
//! MCP handshake and discovers the server's tools via `tools/list`; each
//! tool is then wrapped as an [`McpToolProxy`] and registered under the
//! flattened name `mcp__{server_id}__{tool_name}` (see the `namespace__name`
//! convention used throughout tool synthesis).
//!
//! # Lifecycle
//! 1. `start()` spawns the server, completes `initialize`, sends
//!    `notifications/initialized`, then calls `tools/list`.
//! 2. `call_tool` forwards to `tools/call` and unwraps the MCP result shape.
//! 3. `stop()` drops stdin, which the server observes as EOF.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};

use crate::tools::{Tool, ToolResult};

use super::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Static description of one configured external protocol server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// A tool exposed by an MCP server, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

struct McpProcess {
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    next_id: u64,
}

impl McpProcess {
    fn next_id(&mut self) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        Value::Number(id.into())
    }

    async fn call(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String> {
        let id = self.next_id();
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let mut line = serde_json::to_string(&req).map_err(|e| format!("MCP serialize error: {e}"))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("MCP write error: {e}"))?;
        self.stdin.flush().await.map_err(|e| format!("MCP flush error: {e}"))?;

        let mut resp_line = String::new();
        self.stdout
            .read_line(&mut resp_line)
            .await
            .map_err(|e| format!("MCP read error: {e}"))?;

        if resp_line.is_empty() {
            return Err("MCP server closed the connection".to_string());
        }

        serde_json::from_str::<JsonRpcResponse>(&resp_line).map_err(|e| format!("MCP deserialize error: {e}"))
    }
}

/// Manages a long-running MCP server process.
///
/// All method calls are serialized via an internal `Mutex` so concurrent
/// tool invocations don't interleave requests/responses on the shared
/// stdio stream.
pub struct McpClient {
    server_id: String,
    process: Mutex<Option<McpProcess>>,
    config: McpServerConfig,
    tools: Mutex<Vec<McpTool>>,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Self {
        let server_id = config.id.clone();
        Self {
            server_id,
            process: Mutex::new(None),
            config,
            tools: Mutex::new(vec![]),
        }
    }

    pub async fn start(&self) -> Result<Vec<McpTool>, String> {
        let mut proc_guard = self.process.lock().await;

        let mut child = tokio::process::Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to start MCP server '{}': {e}", self.config.command))?;

        let stdin = child.stdin.take().ok_or("MCP child has no stdin")?;
        let stdout_raw = child.stdout.take().ok_or("MCP child has no stdout")?;
        let stdout = BufReader::new(stdout_raw);

        let mut proc = McpProcess {
            stdin,
            stdout,
            next_id: 0,
        };

        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "kiln",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        proc.call("initialize", Some(init_params)).await.and_then(|r| r.into_result())?;

        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        let mut notif_line =
            serde_json::to_string(&notif).map_err(|e| format!("MCP notification serialize error: {e}"))?;
        notif_line.push('\n');
        proc.stdin
            .write_all(notif_line.as_bytes())
            .await
            .map_err(|e| format!("MCP notification write error: {e}"))?;

        let tools_result = proc.call("tools/list", None).await?.into_result()?;
        let tools: Vec<McpTool> = tools_result
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        *proc_guard = Some(proc);
        *self.tools.lock().await = tools.clone();

        tracing::info!(server = %self.server_id, count = tools.len(), "MCP server started");
        Ok(tools)
    }

    pub async fn stop(&self) {
        let mut proc_guard = self.process.lock().await;
        *proc_guard = None; // Dropping McpProcess closes stdin; server sees EOF.
        tracing::info!(server = %self.server_id, "MCP server stopped");
    }

    pub async fn call_tool(&self, tool_name: &str, input: Value) -> Result<Value, String> {
        let mut proc_guard = self.process.lock().await;
        let proc = proc_guard
            .as_mut()
            .ok_or_else(|| format!("MCP server '{}' is not running", self.server_id))?;

        let params = serde_json::json!({ "name": tool_name, "arguments": input });
        let resp = proc.call("tools/call", Some(params)).await?;
        let result = resp.into_result()?;

        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            let msg = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("tool returned an error");
            return Err(msg.to_string());
        }

        Ok(result)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub async fn tools(&self) -> Vec<McpTool> {
        self.tools.lock().await.clone()
    }
}

/// A [`Tool`] implementation that delegates execution to an [`McpClient`].
///
/// The tool name follows the flattened convention `mcp__{server_id}__{tool_name}`.
pub struct McpToolProxy {
    full_name: String,
    tool_name: String,
    description: String,
    input_schema: Value,
    client: Arc<McpClient>,
}

impl McpToolProxy {
    pub fn new(server_id: &str, tool: &McpTool, client: Arc<McpClient>) -> Self {
        Self {
            full_name: format!("mcp__{server_id}__{}", tool.name),
            tool_name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        match self.client.call_tool(&self.tool_name, args).await {
            Ok(value) => {
                let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(ToolResult::ok(output))
            }
            Err(e) => Ok(ToolResult::err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_tool_proxy_name_follows_flattened_convention() {
        let config = McpServerConfig {
            id: "my-server".to_string(),
            command: "mcp-server".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let client = Arc::new(McpClient::new(config));
        let tool = McpTool {
            name: "do-thing".to_string(),
            description: "Does a thing".to_string(),
            input_schema: Value::Null,
        };

        let proxy = McpToolProxy::new("my-server", &tool, client);
        assert_eq!(proxy.name(), "mcp__my-server__do-thing");
        assert_eq!(proxy.description(), "Does a thing");
    }

    #[test]
    fn mcp_tool_deserializes_with_missing_schema() {
        let json = r#"{"name":"t","description":"d"}"#;
        let tool: McpTool = serde_json::from_str(json).unwrap();
        assert!(tool.input_schema.is_null());
    }
}
