//! Owns every configured MCP server's client, starts them at process
//! startup, and exposes the combined tool set plus a [`McpCaller`] that
//! routes a `(server_id, tool_name)` call to the right client.
//!
//! Feature-gated: only compiled with `--features mcp-client`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::dispatch::McpCaller;
use crate::tools::synthesiser::McpToolHandle;

use super::client::{McpClient, McpServerConfig};

pub struct McpManager {
    clients: HashMap<String, Arc<McpClient>>,
}

impl McpManager {
    /// Starts every configured server, discovering its tools. A server that
    /// fails to start is logged and skipped rather than failing the whole
    /// manager — one broken MCP server shouldn't take the agent down.
    pub async fn start(configs: Vec<McpServerConfig>) -> (Self, Vec<McpToolHandle>) {
        let mut clients = HashMap::new();
        let mut handles = Vec::new();

        for config in configs {
            let server_id = config.id.clone();
            let client = Arc::new(McpClient::new(config));
            match client.start().await {
                Ok(tools) => {
                    for tool in tools {
                        handles.push(McpToolHandle {
                            flattened_name: format!("mcp__{server_id}__{}", tool.name),
                            server_id: server_id.clone(),
                            tool_name: tool.name.clone(),
                            description: tool.description.clone(),
                            input_schema: tool.input_schema.clone(),
                        });
                    }
                    clients.insert(server_id, client);
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "mcp server failed to start, skipping");
                }
            }
        }

        (Self { clients }, handles)
    }

    pub async fn stop_all(&self) {
        for client in self.clients.values() {
            client.stop().await;
        }
    }
}

#[async_trait]
impl McpCaller for McpManager {
    async fn call(&self, server_id: &str, tool_name: &str, arguments: Value) -> Result<Value, String> {
        let client = self
            .clients
            .get(server_id)
            .ok_or_else(|| format!("unknown mcp server: {server_id}"))?;
        client.call_tool(tool_name, arguments).await
    }
}
