//! TOML configuration schema for the kiln core.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.kiln/config.toml`:
//! ```toml
//! [provider]
//! default_id = "openrouter"
//! default_model = "anthropic/claude-sonnet-4.5"
//!
//! [pool]
//! pool_min_size = 2
//! pool_max_size = 8
//!
//! [queue]
//! queue_function_concurrency = 4
//! queue_agent_concurrency = 4
//!
//! [gateway]
//! bind_addr = "127.0.0.1:8787"
//! ```

use serde::{Deserialize, Serialize};

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// ID of the default LLM provider (e.g. `"openrouter"`, `"vercel-ai-gateway"`).
    pub default_id: String,
    /// Default model identifier (e.g. `"anthropic/claude-sonnet-4.5"`).
    pub default_model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts on transient errors.
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_id: "openrouter".to_owned(),
            default_model: "anthropic/claude-sonnet-4.5".to_owned(),
            request_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

// ─── PoolConfig (sandbox::pool) ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub image: String,
    pub pool_min_size: usize,
    pub pool_min_idle: usize,
    pub pool_max_size: usize,
    pub pool_max_executions: u64,
    pub pool_acquire_timeout_secs: u64,
    pub function_timeout_secs: u64,
    pub network_disabled: bool,
    /// `"auto"` asks the pool to adopt its own container's network;
    /// anything else is passed through verbatim.
    pub docker_network: String,
    pub memory_limit_mb: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            image: "kiln-sandbox:latest".to_string(),
            pool_min_size: 2,
            pool_min_idle: 1,
            pool_max_size: 8,
            pool_max_executions: 200,
            pool_acquire_timeout_secs: 10,
            function_timeout_secs: 30,
            network_disabled: true,
            docker_network: "auto".to_string(),
            memory_limit_mb: Some(512),
        }
    }
}

impl PoolConfig {
    pub fn to_pool_config(&self) -> crate::sandbox::PoolConfig {
        crate::sandbox::PoolConfig {
            image: self.image.clone(),
            pool_min_size: self.pool_min_size,
            pool_min_idle: self.pool_min_idle,
            pool_max_size: self.pool_max_size,
            pool_max_executions: self.pool_max_executions,
            function_timeout_secs: self.function_timeout_secs,
            name_prefix: "pool".to_string(),
            network_disabled: self.network_disabled,
            docker_network: if self.docker_network == "auto" {
                None
            } else {
                Some(self.docker_network.clone())
            },
            memory_limit_mb: self.memory_limit_mb,
        }
    }
}

// ─── SharedWorkerPoolConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub image: String,
    pub default_worker_count: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            image: "kiln-worker:latest".to_string(),
            default_worker_count: 2,
        }
    }
}

// ─── QueueConfig (queue::service) ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub queue_function_concurrency: usize,
    pub queue_agent_concurrency: usize,
    pub queue_max_retries: u32,
    pub queue_retry_delay_secs: u64,
    pub queue_default_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_function_concurrency: 4,
            queue_agent_concurrency: 4,
            queue_max_retries: 3,
            queue_retry_delay_secs: 2,
            queue_default_timeout_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn to_queue_config(&self) -> crate::queue::QueueConfig {
        crate::queue::QueueConfig {
            function_concurrency: self.queue_function_concurrency,
            agent_concurrency: self.queue_agent_concurrency,
            max_retries: self.queue_max_retries,
            retry_delay: std::time::Duration::from_secs(self.queue_retry_delay_secs),
            default_timeout: std::time::Duration::from_secs(self.queue_default_timeout_secs),
        }
    }
}

// ─── ExecutorConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Resource caps passed through to sandboxed containers; enforced by the
    /// runtime, not the executor itself.
    pub max_function_memory_mb: u64,
    pub max_function_cpu_millis: u64,
    pub max_function_storage_mb: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_function_memory_mb: 512,
            max_function_cpu_millis: 1000,
            max_function_storage_mb: 256,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Autonomy level: `"readonly"`, `"supervised"`, or `"autonomous"`.
    pub autonomy_level: String,
    /// Commands blocked regardless of autonomy level.
    pub blocked_commands: Vec<String>,
    /// Rate limit: max tool calls per minute.
    pub rate_limit_per_minute: u32,
    /// Rate limit: max tool calls per hour.
    pub rate_limit_per_hour: u32,
    /// Ceiling on tool-calling recursion depth within one agent turn, to
    /// stop a runaway loop rather than let it call the LLM indefinitely.
    pub max_tool_call_depth: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            autonomy_level: "supervised".to_owned(),
            blocked_commands: Vec::new(),
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 600,
            max_tool_call_depth: 10,
        }
    }
}

// ─── GatewayConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Bounded per-channel buffer size before the stream relay starts
    /// dropping chunks and emitting a loss `error` envelope.
    pub relay_channel_buffer: usize,
    /// Bearer token → user id, granting that user full permissions. A
    /// minimal bootstrap [`crate::security::TokenResolver`]; deployments
    /// that need real auth (JWT, session lookup) supply their own resolver
    /// instead of populating this map.
    pub static_tokens: std::collections::HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            relay_channel_buffer: 256,
            static_tokens: std::collections::HashMap::new(),
        }
    }
}

// ─── DatabaseConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Override path to the sqlite database file (default: `~/.kiln/kiln.db`).
    pub path: Option<String>,
}

// ─── RegistryConfig ───────────────────────────────────────────────────────────

/// Where function and agent definitions are loaded from. The core treats
/// these as externally-authored specs, not entities it owns — see
/// `crate::registry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory of `*.toml` function specs, recursively scanned.
    pub functions_dir: Option<String>,
    /// Directory of `*.toml` agent specs, recursively scanned.
    pub agents_dir: Option<String>,
    /// Directory of local skill markdown files, in addition to the skills
    /// compiled into the binary.
    pub skills_dir: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            functions_dir: None,
            agents_dir: None,
            skills_dir: None,
        }
    }
}

// ─── McpConfig ────────────────────────────────────────────────────────────────

/// One external protocol (MCP) server to start at daemon boot. Only
/// consumed when the `mcp-client` feature is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct McpServerEntry {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct McpConfig {
    pub servers: Vec<McpServerEntry>,
}

// ─── LoggingConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive, e.g. `"kiln_core=debug,info"`.
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.kiln/config.toml`, falling back to defaults, with
/// `KILN_*` environment variables overriding individual fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub pool: PoolConfig,
    pub worker_pool: WorkerPoolConfig,
    pub queue: QueueConfig,
    pub executor: ExecutorConfig,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub mcp: McpConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: AppConfig = toml::from_str(&s).expect("deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let s = r#"
            [provider]
            default_id = "custom"
        "#;
        let cfg: AppConfig = toml::from_str(s).expect("deserialize");
        assert_eq!(cfg.provider.default_id, "custom");
        assert_eq!(cfg.pool.pool_min_size, PoolConfig::default().pool_min_size);
    }

    #[test]
    fn pool_config_auto_network_maps_to_none() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.to_pool_config().docker_network, None);
    }
}
