//! Sandboxed execution core: pooled containers, a durable job queue, and an
//! agent tool-calling engine. See [`Core::init`] for the startup sequence
//! both `kilnd` (the daemon) and `kiln` (the headless CLI) build on.

pub mod agent;
pub mod ai;
pub mod config;
pub mod database;
pub mod event_bus;
pub mod executor;
#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "mcp-client")]
pub mod mcp;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod sandbox;
pub mod security;
pub mod skills;
pub mod state;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use agent::{AgentEngine, AgentEngineDeps, AgentEngineError};
use ai::registry::ProviderRegistry;
use config::AppConfig;
use database::DbError;
use event_bus::{EventBus, TokioBroadcastBus};
use executor::{Executor, ExecutorError};
use queue::{JobQueue, QueueError, QueueName};
use registry::{AgentRegistry, FunctionRegistry, InMemoryAgentRegistry, InMemoryFunctionRegistry};
use relay::StreamRelay;
use security::TokenResolver;
use skills::SkillRegistry;
use state::StateStore;
use tools::ToolSynthesiser;

/// Crate-wide error taxonomy (kinds, not concrete causes): every subsystem
/// error converts into one of these at its module boundary rather than
/// every fallible call threading its own error type through the whole
/// call stack.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("execution failed: {0}")]
    ExecutionFailure(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<DbError> for CoreError {
    fn from(e: DbError) -> Self {
        CoreError::Infrastructure(e.to_string())
    }
}

impl From<ExecutorError> for CoreError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::NotFound(m) => CoreError::NotFound(m),
            ExecutorError::Validation(m) | ExecutorError::OutputValidation(m) => CoreError::Validation(m),
            ExecutorError::NotAwaitingInput(m) => CoreError::Validation(m),
            ExecutorError::Infrastructure(m) => CoreError::Infrastructure(m),
            ExecutorError::Database(m) => CoreError::Infrastructure(m),
        }
    }
}

impl From<QueueError> for CoreError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Timeout(job_id) => CoreError::Timeout(job_id),
            QueueError::JobFailed(_, msg) => CoreError::ExecutionFailure(msg),
            QueueError::Database(m) => CoreError::Infrastructure(m),
        }
    }
}

impl From<AgentEngineError> for CoreError {
    fn from(e: AgentEngineError) -> Self {
        match e {
            AgentEngineError::ChatNotFound(m) | AgentEngineError::AgentNotFound(_, _) => {
                CoreError::NotFound(e_to_string(&e, m))
            }
            AgentEngineError::ProviderNotFound(id) => CoreError::NotFound(id),
            AgentEngineError::ApprovalNotFound(id) => CoreError::NotFound(id),
            AgentEngineError::ApprovalAlreadyDecided(id) => CoreError::Validation(id),
            AgentEngineError::Database(m) => CoreError::Infrastructure(m),
            AgentEngineError::Provider(m) => CoreError::Infrastructure(m),
            AgentEngineError::Dispatch(m) => CoreError::ExecutionFailure(m),
            AgentEngineError::Render(m) => CoreError::Infrastructure(m),
            AgentEngineError::DepthExceeded => CoreError::Validation("tool-calling depth limit exceeded".to_string()),
        }
    }
}

// `AgentNotFound` carries two fields; fold them into one message without
// duplicating the match arm above.
fn e_to_string(e: &AgentEngineError, fallback: String) -> String {
    match e {
        AgentEngineError::AgentNotFound(ns, name) => format!("{ns}/{name}"),
        _ => fallback,
    }
}

#[cfg(feature = "containers")]
impl From<sandbox::PoolError> for CoreError {
    fn from(e: sandbox::PoolError) -> Self {
        CoreError::PoolExhausted(e.to_string())
    }
}

/// Everything the daemon and CLI need, assembled once at startup from
/// [`AppConfig`]. Cheap to clone (every field is an `Arc` or a pooled
/// handle); hand a clone to each queue worker / gateway request.
pub struct Core {
    pub config: AppConfig,
    pub db: database::DbPool,
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<JobQueue>,
    pub executor: Arc<Executor>,
    pub agent_engine: Arc<AgentEngine>,
    pub relay: Arc<StreamRelay>,
    pub functions: Arc<dyn FunctionRegistry>,
    pub agents: Arc<dyn AgentRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub container_pool: Arc<sandbox::ContainerPool>,
    pub worker_pool: Arc<sandbox::SharedWorkerPool>,
    #[cfg(feature = "mcp-client")]
    pub mcp_manager: Option<Arc<mcp::McpManager>>,
}

impl Core {
    /// Runs the full startup sequence: opens/migrates the database, builds
    /// the sandbox pools, loads function/agent registries from the
    /// configured directories, constructs the provider registry from
    /// `KILN_PROVIDER_API_KEY`, wires the job queue, and spins up the
    /// `functions` and `agents` worker pools. Does not start the gateway —
    /// callers that want HTTP do that separately with [`gateway::start_gateway`].
    pub async fn init(config: AppConfig) -> Result<Arc<Self>, CoreError> {
        let db_path = config
            .database
            .path
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(database::default_database_path);
        let db = database::init(&db_path)?;

        let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());

        let runtime = sandbox::detect_runtime()
            .ok_or_else(|| CoreError::Infrastructure("no container runtime (docker/podman) found on PATH".to_string()))?;
        let container_pool = Arc::new(sandbox::ContainerPool::new(
            runtime.clone(),
            config.pool.to_pool_config(),
        ));
        let worker_pool = Arc::new(sandbox::SharedWorkerPool::new(
            runtime,
            config.worker_pool.clone(),
        ));

        let functions: Arc<dyn FunctionRegistry> = match &config.registry.functions_dir {
            Some(dir) => Arc::new(
                InMemoryFunctionRegistry::from_dir(Path::new(dir))
                    .map_err(CoreError::Infrastructure)?,
            ),
            None => Arc::new(InMemoryFunctionRegistry::empty()),
        };
        let agents: Arc<dyn AgentRegistry> = match &config.registry.agents_dir {
            Some(dir) => Arc::new(
                InMemoryAgentRegistry::from_dir(Path::new(dir)).map_err(CoreError::Infrastructure)?,
            ),
            None => Arc::new(InMemoryAgentRegistry::empty()),
        };

        let executor = Arc::new(Executor::new(
            db.clone(),
            functions.clone(),
            container_pool.clone(),
            worker_pool.clone(),
        ));

        let queue = Arc::new(JobQueue::new(db.clone(), bus.clone(), config.queue.to_queue_config()));
        let relay = Arc::new(StreamRelay::new(config.gateway.relay_channel_buffer));
        let state = Arc::new(StateStore::new(db.clone()));
        let skill_loader = Arc::new(skills::SkillLoader::new(
            config.registry.skills_dir.as_ref().map(std::path::PathBuf::from),
            None,
        ));
        let skills = Arc::new(SkillRegistry::new(skill_loader));
        if let Err(e) = skills.initialize().await {
            tracing::warn!(error = %e, "skill registry failed to initialize; continuing with embedded skills only");
        }

        let providers = Arc::new(build_provider_registry(&config)?);

        #[cfg(feature = "mcp-client")]
        let (mcp_manager, mcp_tools) = {
            let configs = config
                .mcp
                .servers
                .iter()
                .map(|s| mcp::McpServerConfig {
                    id: s.id.clone(),
                    command: s.command.clone(),
                    args: s.args.clone(),
                    env: s.env.clone(),
                })
                .collect();
            let (manager, tools) = mcp::McpManager::start(configs).await;
            (Some(Arc::new(manager)), tools)
        };
        #[cfg(not(feature = "mcp-client"))]
        let mcp_tools: Vec<tools::synthesiser::McpToolHandle> = Vec::new();

        let synthesiser = Arc::new(ToolSynthesiser::new(functions.clone(), agents.clone()));

        let agent_deps = AgentEngineDeps {
            db: db.clone(),
            agents: agents.clone(),
            providers: providers.clone(),
            default_model: config.provider.default_model.clone(),
            executor: executor.clone(),
            queue: queue.clone(),
            state,
            skills,
            relay: relay.clone(),
            synthesiser,
            mcp_tools,
            #[cfg(feature = "mcp-client")]
            mcp: mcp_manager
                .clone()
                .map(|m| m as Arc<dyn tools::dispatch::McpCaller>),
            #[cfg(not(feature = "mcp-client"))]
            mcp: None,
            token_resolver: None,
            max_tool_call_depth: config.security.max_tool_call_depth,
        };
        let agent_engine = AgentEngine::new(agent_deps);

        queue.spawn_workers(QueueName::Functions, config.queue.queue_function_concurrency, executor.clone());
        queue.spawn_workers(QueueName::Agents, config.queue.queue_agent_concurrency, agent_engine.clone());

        Ok(Arc::new(Self {
            config,
            db,
            bus,
            queue,
            executor,
            agent_engine,
            relay,
            functions,
            agents,
            providers,
            container_pool,
            worker_pool,
            #[cfg(feature = "mcp-client")]
            mcp_manager,
        }))
    }

    /// Bearer-token resolver built from `gateway.static_tokens`, for
    /// processes (the gateway) that need a [`TokenResolver`] without
    /// bringing their own.
    #[cfg(feature = "gateway")]
    pub fn static_token_resolver(&self) -> Arc<dyn TokenResolver> {
        Arc::new(gateway::auth::StaticTokenResolver::new(
            self.config.gateway.static_tokens.clone(),
        ))
    }
}

fn build_provider_registry(config: &AppConfig) -> Result<ProviderRegistry, CoreError> {
    let api_key = std::env::var("KILN_PROVIDER_API_KEY").unwrap_or_default();
    let mut registry = ProviderRegistry::new(config.provider.default_id.clone());
    let provider = ai::provider::ProviderFactory::create(
        &config.provider.default_id,
        &api_key,
        None,
        Some(&config.provider.default_model),
    )
    .map_err(CoreError::Infrastructure)?;
    registry.register(config.provider.default_id.clone(), provider);
    Ok(registry)
}
