//! Client for external protocol (MCP-style) tool servers.
//!
//! Feature-gated: only compiled with `--features mcp-client`.

pub mod client;
pub mod manager;
pub mod protocol;

pub use client::{McpClient, McpServerConfig, McpTool, McpToolProxy};
pub use manager::McpManager;
