//! Runs the tool-calling conversation loop for one chat turn: assembles
//! context, streams from the resolved LLM provider, accumulates tool
//! calls, dispatches them, and loops until the model stops asking for
//! tools or the turn parks on an approval.
//!
//! Constructed via [`AgentEngine::new`], which uses `Arc::new_cyclic` so
//! the owned [`ToolDispatcher`] can hold a `Weak`-backed [`SubAgentRunner`]
//! that calls back into the engine for `enabled_agent` tool calls, without
//! a true `Arc` reference cycle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use diesel::prelude::*;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::ai::provider::LLMProvider;
use crate::ai::registry::ProviderRegistry;
use crate::ai::types::{CompletionRequest, Message, ToolCall, ToolCallFunction, ToolDefinition};
use crate::database::models::chat::{Chat, NewChat};
use crate::database::models::message::{MessageRole as DbMessageRole, MessageRow, NewMessage};
use crate::database::models::pending_approval::{NewPendingApproval, PendingApprovalDecision, PendingApprovalRow};
use crate::database::schema::{chats::dsl as chats_dsl, messages::dsl as messages_dsl, pending_approvals::dsl as approvals_dsl};
use crate::database::DbPool;
use crate::executor::Executor;
use crate::queue::{Job, JobHandler, JobPayload};
use crate::registry::{AgentRegistry, AgentSpec};
use crate::relay::{RelayEnvelope, StreamRelay};
use crate::security::permissions::{TokenResolver, UserContext};
use crate::skills::{SkillDefinition, SkillRegistry};
use crate::state::StateStore;
use crate::tools::dispatch::{McpCaller, SubAgentRunner};
use crate::tools::synthesiser::{McpToolHandle, SynthesisInputs, SynthesisedTool, ToolSource};
use crate::tools::{ToolDispatcher, ToolSynthesiser};

#[derive(Debug, Error)]
pub enum AgentEngineError {
    #[error("chat {0} not found")]
    ChatNotFound(String),
    #[error("agent {0}/{1} not found")]
    AgentNotFound(String, String),
    #[error("no LLM provider registered for {0}")]
    ProviderNotFound(String),
    #[error("pending approval {0} not found")]
    ApprovalNotFound(String),
    #[error("pending approval {0} was already decided")]
    ApprovalAlreadyDecided(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("tool dispatch error: {0}")]
    Dispatch(String),
    #[error("template/serialization error: {0}")]
    Render(String),
    #[error("tool-calling depth limit exceeded")]
    DepthExceeded,
}

/// Everything [`AgentEngine::new`] needs, gathered at process startup.
pub struct AgentEngineDeps {
    pub db: DbPool,
    pub agents: Arc<dyn AgentRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub default_model: String,
    pub executor: Arc<Executor>,
    pub queue: Arc<crate::queue::JobQueue>,
    pub state: Arc<StateStore>,
    pub skills: Arc<SkillRegistry>,
    pub relay: Arc<StreamRelay>,
    pub synthesiser: Arc<ToolSynthesiser>,
    pub mcp_tools: Vec<McpToolHandle>,
    pub mcp: Option<Arc<dyn McpCaller>>,
    pub token_resolver: Option<Arc<dyn TokenResolver>>,
    pub max_tool_call_depth: u32,
}

pub struct AgentEngine {
    db: DbPool,
    agents: Arc<dyn AgentRegistry>,
    providers: Arc<ProviderRegistry>,
    default_model: String,
    state: Arc<StateStore>,
    skills: Arc<SkillRegistry>,
    relay: Arc<StreamRelay>,
    synthesiser: Arc<ToolSynthesiser>,
    dispatcher: Arc<ToolDispatcher>,
    mcp_tools: Vec<McpToolHandle>,
    token_resolver: Option<Arc<dyn TokenResolver>>,
    max_tool_call_depth: u32,
}

/// Routes `enabled_agent` tool calls back into the engine that owns this
/// dispatcher, without the dispatcher holding a strong `Arc` back-reference.
struct EngineSubAgentRunner(Weak<AgentEngine>);

#[async_trait]
impl SubAgentRunner for EngineSubAgentRunner {
    async fn run_sub_agent(
        &self,
        namespace: &str,
        name: &str,
        input: Value,
        user: &UserContext,
        parent_chat_id: &str,
    ) -> Result<String, String> {
        let engine = self.0.upgrade().ok_or_else(|| "agent engine has shut down".to_string())?;
        engine.run_sub_agent(namespace, name, input, user, parent_chat_id).await
    }
}

struct AccumulatingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl AgentEngine {
    pub fn new(deps: AgentEngineDeps) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<AgentEngine>| {
            let sub_agents: Arc<dyn SubAgentRunner> = Arc::new(EngineSubAgentRunner(weak.clone()));
            let dispatcher = Arc::new(ToolDispatcher::new(
                deps.executor.clone(),
                deps.queue.clone(),
                deps.state.clone(),
                Some(sub_agents),
                deps.mcp.clone(),
            ));

            Self {
                db: deps.db,
                agents: deps.agents,
                providers: deps.providers,
                default_model: deps.default_model,
                state: deps.state,
                skills: deps.skills,
                relay: deps.relay,
                synthesiser: deps.synthesiser,
                dispatcher,
                mcp_tools: deps.mcp_tools,
                token_resolver: deps.token_resolver,
                max_tool_call_depth: deps.max_tool_call_depth,
            }
        })
    }

    /// Run one turn: persist the user's message, assemble context, converse
    /// with the LLM until it stops requesting tools (or parks on an
    /// approval), and return the final assistant content. `channel_id`
    /// selects the relay channel chunks are published to; defaults to
    /// `chat_id` when absent (blocking callers with no separate transport).
    pub async fn run(
        &self,
        chat_id: &str,
        user: &UserContext,
        user_message_content: &str,
        channel_id: Option<&str>,
    ) -> Result<String, AgentEngineError> {
        let chat = self.load_chat(chat_id).await?.ok_or_else(|| AgentEngineError::ChatNotFound(chat_id.to_string()))?;
        let agent = self
            .agents
            .get(&chat.agent_namespace, &chat.agent_name)
            .ok_or_else(|| AgentEngineError::AgentNotFound(chat.agent_namespace.clone(), chat.agent_name.clone()))?;
        let relay_channel = channel_id.unwrap_or(&chat.id).to_string();

        self.persist_message(&chat.id, &Uuid::new_v4().to_string(), DbMessageRole::User, user_message_content, &[], None, None)
            .await?;

        let history = self.load_history(&chat.id).await?;
        let system_prompt = self.render_system_prompt(&chat, &agent).await?;
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(history.iter().map(message_row_to_llm));

        let all_skills = self.skills.get_many(&agent.enabled_skills);
        let paused = self.paused_execution_ids(&chat.id).await?;
        let mcp_tools = self.mcp_tools_for(&agent);
        let inputs = build_synthesis_inputs(&all_skills, mcp_tools, paused);
        let (tools, preload_block) = self.synthesiser.synthesise(&agent, &inputs);
        if !preload_block.is_empty() {
            if let Some(system) = messages.first_mut() {
                system.content.push_str(&preload_block);
            }
        }

        let provider = self.resolve_provider(&agent)?;
        let model = agent.model.clone().unwrap_or_else(|| self.default_model.clone());

        self.converse(&chat, &agent, messages, tools, &provider, &model, user, &relay_channel).await
    }

    /// Resume a parked turn after a human has approved or rejected the
    /// tool call(s) it stopped on.
    pub async fn resume(&self, approval_id: &str, approved: bool, channel_id: Option<&str>) -> Result<String, AgentEngineError> {
        let row = self
            .load_pending_approval(approval_id)
            .await?
            .ok_or_else(|| AgentEngineError::ApprovalNotFound(approval_id.to_string()))?;
        if row.decision.is_some() {
            return Err(AgentEngineError::ApprovalAlreadyDecided(approval_id.to_string()));
        }

        let chat = self.load_chat(&row.chat_id).await?.ok_or_else(|| AgentEngineError::ChatNotFound(row.chat_id.clone()))?;
        let agent = self
            .agents
            .get(&chat.agent_namespace, &chat.agent_name)
            .ok_or_else(|| AgentEngineError::AgentNotFound(chat.agent_namespace.clone(), chat.agent_name.clone()))?;
        let relay_channel = channel_id.unwrap_or(&chat.id).to_string();

        self.set_approval_decision(approval_id, if approved { "approved" } else { "rejected" }).await?;

        let mut messages: Vec<Message> =
            serde_json::from_str(&row.conversation_snapshot_json).map_err(|e| AgentEngineError::Render(e.to_string()))?;
        let all_tool_calls: Vec<ToolCall> =
            serde_json::from_str(&row.all_tool_calls_json).map_err(|e| AgentEngineError::Render(e.to_string()))?;

        // The approval row only carries `user_id`, not a permission set — a
        // human just explicitly authorised this exact call, so the resumed
        // dispatch runs with full access rather than re-deriving a scope we
        // never persisted.
        let user = UserContext::new(row.user_id.clone(), HashMap::from([("resource.*:all".to_string(), true)]));

        let all_skills = self.skills.get_many(&agent.enabled_skills);
        let paused = self.paused_execution_ids(&chat.id).await?;
        let mcp_tools = self.mcp_tools_for(&agent);
        let inputs = build_synthesis_inputs(&all_skills, mcp_tools, paused);
        let (tools, _) = self.synthesiser.synthesise(&agent, &inputs);
        let active_tools: HashMap<String, SynthesisedTool> =
            tools.iter().cloned().map(|t| (t.definition.function.name.clone(), t)).collect();

        if approved {
            for tc in &all_tool_calls {
                let result = self
                    .dispatcher
                    .dispatch(&active_tools, &tc.function.name, &tc.function.arguments, &user, &chat.id)
                    .await
                    .map_err(AgentEngineError::Dispatch)?;
                self.persist_message(&chat.id, &Uuid::new_v4().to_string(), DbMessageRole::Tool, &result, &[], Some(&tc.id), Some(&tc.function.name))
                    .await?;
                messages.push(Message::tool(tc.id.clone(), tc.function.name.clone(), result));
            }
        } else {
            self.relay.publish(&relay_channel, RelayEnvelope::ToolRejected { tool_call_id: row.tool_call_id.clone() });
            let rejection = serde_json::json!({"error": "tool call rejected by the user"}).to_string();
            self.persist_message(&chat.id, &Uuid::new_v4().to_string(), DbMessageRole::Tool, &rejection, &[], Some(&row.tool_call_id), None)
                .await?;
            messages.push(Message::tool(row.tool_call_id.clone(), String::new(), rejection));
        }

        let provider = self.resolve_provider(&agent)?;
        let model = agent.model.clone().unwrap_or_else(|| self.default_model.clone());

        self.converse(&chat, &agent, messages, tools, &provider, &model, &user, &relay_channel).await
    }

    /// Open a fresh sub-chat bound to `namespace/name` and run one turn on
    /// it. Invoked by [`EngineSubAgentRunner`] for `enabled_agent` tools.
    async fn run_sub_agent(
        &self,
        namespace: &str,
        name: &str,
        input: Value,
        user: &UserContext,
        parent_chat_id: &str,
    ) -> Result<String, String> {
        let chat_id = Uuid::new_v4().to_string();
        let mut agent_input = if input.is_object() { input.clone() } else { Value::Object(Default::default()) };
        agent_input["parent_chat_id"] = Value::String(parent_chat_id.to_string());

        self.insert_chat(NewChat {
            id: chat_id.clone(),
            user_id: user.user_id.clone(),
            agent_namespace: namespace.to_string(),
            agent_name: name.to_string(),
            agent_input_json: agent_input.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
        .await
        .map_err(|e| e.to_string())?;

        // The sub-agent's system prompt renders from `agent_input` above; the
        // first conversational turn still needs a plain-text message — use
        // `message` if the caller's schema has one, else the raw arguments.
        let message = input
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());

        self.run(&chat_id, user, &message, None).await.map_err(|e| e.to_string())
    }

    fn resolve_provider(&self, agent: &AgentSpec) -> Result<Arc<dyn LLMProvider>, AgentEngineError> {
        self.providers
            .resolve(agent.llm_provider_ref.as_deref())
            .ok_or_else(|| AgentEngineError::ProviderNotFound(agent.llm_provider_ref.clone().unwrap_or_else(|| "default".to_string())))
    }

    fn mcp_tools_for(&self, agent: &AgentSpec) -> Vec<McpToolHandle> {
        self.mcp_tools
            .iter()
            .filter(|h| agent.enabled_mcp_tools.iter().any(|e| e == &format!("{}/{}", h.server_id, h.tool_name)))
            .cloned()
            .collect()
    }

    async fn render_system_prompt(&self, chat: &Chat, agent: &AgentSpec) -> Result<String, AgentEngineError> {
        let agent_input: Value = serde_json::from_str(&chat.agent_input_json).unwrap_or(Value::Null);
        let mut context = tera::Context::new();
        context.insert("agent_input", &agent_input);
        let mut rendered = tera::Tera::one_off(&agent.system_prompt, &context, true).map_err(|e| AgentEngineError::Render(e.to_string()))?;

        let mut state_block = String::new();
        for namespace in agent.all_readable_namespaces() {
            let entries = self
                .state
                .list_namespace(&chat.user_id, namespace)
                .await
                .map_err(|e| AgentEngineError::Database(e.to_string()))?;
            if entries.is_empty() {
                continue;
            }
            state_block.push_str(&format!("\n## {namespace}\n"));
            for (key, value) in entries {
                state_block.push_str(&format!("- {key}: {value}\n"));
            }
        }
        if !state_block.is_empty() {
            rendered.push_str("\n\n# Stored state\n");
            rendered.push_str(&state_block);
        }
        Ok(rendered)
    }

    #[allow(clippy::too_many_arguments)]
    async fn converse(
        &self,
        chat: &Chat,
        agent: &AgentSpec,
        mut messages: Vec<Message>,
        tools: Vec<SynthesisedTool>,
        provider: &Arc<dyn LLMProvider>,
        model: &str,
        user: &UserContext,
        relay_channel: &str,
    ) -> Result<String, AgentEngineError> {
        let tool_definitions: Vec<ToolDefinition> = tools.iter().map(|t| t.definition.clone()).collect();
        let active_tools: HashMap<String, SynthesisedTool> = tools.into_iter().map(|t| (t.definition.function.name.clone(), t)).collect();

        let mut depth = 0u32;
        loop {
            depth += 1;
            if depth > self.max_tool_call_depth {
                self.relay.publish_error(relay_channel, "tool-calling depth limit exceeded");
                return Err(AgentEngineError::DepthExceeded);
            }

            let mut request = CompletionRequest::new(model.to_string(), messages.clone()).with_temperature(agent.temperature);
            if let Some(max_tokens) = agent.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            if !tool_definitions.is_empty() {
                request = request.with_tools(tool_definitions.clone());
            }

            let mut stream = provider.stream(request).await.map_err(AgentEngineError::Provider)?;

            let mut content = String::new();
            let mut accumulator: HashMap<String, AccumulatingToolCall> = HashMap::new();
            let mut order: Vec<String> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(AgentEngineError::Provider)?;
                if !chunk.delta.is_empty() {
                    content.push_str(&chunk.delta);
                    self.relay.publish_chunk(relay_channel, chunk.delta.clone());
                }
                for delta in chunk.tool_call_deltas {
                    let key = delta.id.clone().unwrap_or_else(|| format!("idx:{}", delta.index.unwrap_or(0)));
                    if !accumulator.contains_key(&key) {
                        order.push(key.clone());
                    }
                    let entry = accumulator.entry(key.clone()).or_insert_with(|| AccumulatingToolCall {
                        id: delta.id.clone().unwrap_or_else(|| key.clone()),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    if let Some(id) = &delta.id {
                        entry.id = id.clone();
                    }
                    if let Some(name) = &delta.name {
                        entry.name.push_str(name);
                    }
                    if let Some(fragment) = &delta.arguments_fragment {
                        entry.arguments.push_str(fragment);
                    }
                    self.relay.publish(
                        relay_channel,
                        RelayEnvelope::ToolCallDelta {
                            index: delta.index,
                            id: delta.id,
                            name: delta.name,
                            arguments_fragment: delta.arguments_fragment,
                        },
                    );
                }
                if chunk.is_final {
                    break;
                }
            }

            let tool_calls: Vec<ToolCall> = order
                .iter()
                .map(|key| {
                    let call = &accumulator[key];
                    ToolCall {
                        id: call.id.clone(),
                        call_type: "function".to_string(),
                        function: ToolCallFunction { name: call.name.clone(), arguments: call.arguments.clone() },
                    }
                })
                .filter(|tc| {
                    if tc.id.is_empty() || tc.function.name.is_empty() {
                        tracing::warn!(tool_call_id = %tc.id, "dropping streamed tool call missing id or function name");
                        return false;
                    }
                    let args = if tc.function.arguments.is_empty() { "{}" } else { &tc.function.arguments };
                    if serde_json::from_str::<serde_json::Value>(args).is_err() {
                        tracing::warn!(tool_call_id = %tc.id, "dropping streamed tool call with unparseable arguments");
                        return false;
                    }
                    true
                })
                .collect();

            let assistant_message_id = Uuid::new_v4().to_string();
            self.persist_message(&chat.id, &assistant_message_id, DbMessageRole::Assistant, &content, &tool_calls, None, None)
                .await?;
            messages.push(Message::assistant_with_tool_calls(content.clone(), tool_calls.clone()));

            if tool_calls.is_empty() {
                self.relay.publish_done(relay_channel);
                return Ok(content);
            }

            let approvals_needed: Vec<&ToolCall> = tool_calls
                .iter()
                .filter(|tc| active_tools.get(&tc.function.name).map(SynthesisedTool::requires_approval).unwrap_or(false))
                .collect();

            if !approvals_needed.is_empty() {
                let snapshot_json = serde_json::to_string(&messages).map_err(|e| AgentEngineError::Render(e.to_string()))?;
                let all_calls_json = serde_json::to_string(&tool_calls).map_err(|e| AgentEngineError::Render(e.to_string()))?;
                let now = chrono::Utc::now().to_rfc3339();

                for tc in approvals_needed {
                    let tool = &active_tools[&tc.function.name];
                    let function_ref = match &tool.source {
                        ToolSource::Function { namespace, name, .. } => format!("{namespace}/{name}"),
                        _ => tc.function.name.clone(),
                    };
                    let arguments: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);

                    self.insert_pending_approval(NewPendingApproval {
                        id: Uuid::new_v4().to_string(),
                        chat_id: chat.id.clone(),
                        assistant_message_id: Some(assistant_message_id.clone()),
                        user_id: user.user_id.clone(),
                        tool_call_id: tc.id.clone(),
                        function_ref: function_ref.clone(),
                        arguments_json: arguments.to_string(),
                        all_tool_calls_json: all_calls_json.clone(),
                        conversation_snapshot_json: snapshot_json.clone(),
                        created_at: now.clone(),
                    })
                    .await?;

                    self.relay
                        .publish(relay_channel, RelayEnvelope::ApprovalRequired { tool_call_id: tc.id.clone(), function_ref, arguments });
                }

                self.relay.publish_done(relay_channel);
                return Ok(content);
            }

            for tc in &tool_calls {
                let result = self
                    .dispatcher
                    .dispatch(&active_tools, &tc.function.name, &tc.function.arguments, user, &chat.id)
                    .await
                    .map_err(AgentEngineError::Dispatch)?;
                self.persist_message(&chat.id, &Uuid::new_v4().to_string(), DbMessageRole::Tool, &result, &[], Some(&tc.id), Some(&tc.function.name))
                    .await?;
                messages.push(Message::tool(tc.id.clone(), tc.function.name.clone(), result));
            }
        }
    }

    // ── persistence ───────────────────────────────────────────────────

    async fn load_chat(&self, chat_id: &str) -> Result<Option<Chat>, AgentEngineError> {
        let db = self.db.clone();
        let id = chat_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            chats_dsl::chats.filter(chats_dsl::id.eq(&id)).first::<Chat>(&mut conn).optional().map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)
    }

    async fn insert_chat(&self, row: NewChat) -> Result<(), AgentEngineError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(chats_dsl::chats).values(&row).execute(&mut conn).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)?;
        Ok(())
    }

    async fn load_history(&self, chat_id: &str) -> Result<Vec<MessageRow>, AgentEngineError> {
        let db = self.db.clone();
        let id = chat_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            messages_dsl::messages
                .filter(messages_dsl::chat_id.eq(&id))
                .order(messages_dsl::created_at.asc())
                .load::<MessageRow>(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_message(
        &self,
        chat_id: &str,
        id: &str,
        role: DbMessageRole,
        content: &str,
        tool_calls: &[ToolCall],
        tool_call_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), AgentEngineError> {
        let db = self.db.clone();
        let row = NewMessage {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            role: role.as_str().to_string(),
            content_json: serde_json::Value::String(content.to_string()).to_string(),
            tool_calls_json: if tool_calls.is_empty() { None } else { serde_json::to_string(tool_calls).ok() },
            tool_call_id: tool_call_id.map(str::to_string),
            name: name.map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(messages_dsl::messages).values(&row).execute(&mut conn).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)?;
        Ok(())
    }

    async fn load_pending_approval(&self, approval_id: &str) -> Result<Option<PendingApprovalRow>, AgentEngineError> {
        let db = self.db.clone();
        let id = approval_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            approvals_dsl::pending_approvals
                .filter(approvals_dsl::id.eq(&id))
                .first::<PendingApprovalRow>(&mut conn)
                .optional()
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)
    }

    async fn insert_pending_approval(&self, row: NewPendingApproval) -> Result<(), AgentEngineError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::insert_into(approvals_dsl::pending_approvals).values(&row).execute(&mut conn).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)?;
        Ok(())
    }

    async fn set_approval_decision(&self, approval_id: &str, decision: &str) -> Result<(), AgentEngineError> {
        let db = self.db.clone();
        let id = approval_id.to_string();
        let update = PendingApprovalDecision { decision: Some(decision.to_string()) };
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            diesel::update(approvals_dsl::pending_approvals.filter(approvals_dsl::id.eq(&id)))
                .set(update)
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)?;
        Ok(())
    }

    /// Executions in `awaiting_input` for this chat, oldest first — the
    /// set the continuation tool is parameterised over.
    async fn paused_execution_ids(&self, chat_id: &str) -> Result<Vec<String>, AgentEngineError> {
        use crate::database::schema::execution_records::dsl as exec_dsl;

        let db = self.db.clone();
        let id = chat_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.get().map_err(|e| e.to_string())?;
            exec_dsl::execution_records
                .filter(exec_dsl::chat_id.eq(Some(id)))
                .filter(exec_dsl::status.eq("awaiting_input"))
                .order(exec_dsl::created_at.asc())
                .select(exec_dsl::id)
                .load::<String>(&mut conn)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AgentEngineError::Database(e.to_string()))?
        .map_err(AgentEngineError::Database)
    }
}

fn build_synthesis_inputs<'a>(
    all_skills: &'a [SkillDefinition],
    mcp_tools: Vec<McpToolHandle>,
    paused_execution_ids: Vec<String>,
) -> SynthesisInputs<'a> {
    let (preloaded, on_demand): (Vec<&SkillDefinition>, Vec<&SkillDefinition>) =
        all_skills.iter().partition(|s| s.feature.default_enabled);
    SynthesisInputs { preloaded_skills: preloaded, on_demand_skills: on_demand, mcp_tools, paused_execution_ids }
}

fn message_row_to_llm(row: &MessageRow) -> Message {
    use crate::ai::types::MessageRole as LlmRole;

    let role = match DbMessageRole::parse(&row.role) {
        Some(DbMessageRole::System) => LlmRole::System,
        Some(DbMessageRole::Assistant) => LlmRole::Assistant,
        Some(DbMessageRole::Tool) => LlmRole::Tool,
        _ => LlmRole::User,
    };
    let content = content_json_to_text(&row.content_json);
    let tool_calls: Vec<ToolCall> = row.tool_calls_json.as_deref().and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();

    Message { role, content, tool_calls, tool_call_id: row.tool_call_id.clone(), name: row.name.clone() }
}

/// Messages are persisted as JSON (`content_json`); the provider-agnostic
/// transport only speaks plain text today, so a bare JSON string unwraps
/// to its text and anything else round-trips through its compact form.
fn content_json_to_text(content_json: &str) -> String {
    match serde_json::from_str::<Value>(content_json) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => content_json.to_string(),
    }
}

#[async_trait]
impl JobHandler for AgentEngine {
    async fn handle(&self, job: &Job) -> Result<Value, String> {
        match &job.payload {
            JobPayload::AgentMessage { chat_id, user_id, user_token, content, channel_id } => {
                let user = match &self.token_resolver {
                    Some(resolver) => resolver.resolve(user_token).await?,
                    None => UserContext::new(user_id.clone(), HashMap::new()),
                };
                self.run(chat_id, &user, content, Some(channel_id)).await.map(Value::String).map_err(|e| e.to_string())
            }
            JobPayload::AgentResume { approval_id, approved, channel_id } => {
                self.resume(approval_id, *approved, Some(channel_id)).await.map(Value::String).map_err(|e| e.to_string())
            }
            _ => Err("AgentEngine only handles AgentMessage/AgentResume jobs".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{CompletionResponse, Message as LlmMessage, MessageRole as LlmRole, StreamChunk};
    use crate::database::schema::chats::dsl as chats_dsl;
    use crate::event_bus::TokioBroadcastBus;
    use crate::queue::QueueConfig;
    use crate::registry::InMemoryAgentRegistry;
    use crate::sandbox::{ContainerPool, ContainerRuntime, ExecOutput, PoolConfig, SharedWorkerPool};
    use crate::registry::InMemoryFunctionRegistry;
    use futures::stream;

    struct ScriptedProvider {
        chunks: Vec<StreamChunk>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::ai::provider::Result<CompletionResponse> {
            unimplemented!("tests only exercise the streaming path")
        }

        async fn stream(&self, _request: CompletionRequest) -> crate::ai::provider::Result<crate::ai::provider::StreamResponse> {
            let chunks: Vec<crate::ai::provider::Result<StreamChunk>> = self.chunks.iter().cloned().map(Ok).collect();
            Ok(Box::pin(stream::iter(chunks)))
        }

        fn context_limit(&self) -> usize {
            128_000
        }

        fn supports_tools(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    struct DeadRuntime;

    #[async_trait]
    impl ContainerRuntime for DeadRuntime {
        fn binary_name(&self) -> &str {
            "none"
        }
        fn is_available(&self) -> bool {
            false
        }
        async fn pull_image(&self, _image: &str) -> Result<(), String> {
            Err("no runtime in tests".to_string())
        }
        async fn run_detached(&self, _spec: &crate::sandbox::ContainerSpec) -> Result<String, String> {
            Err("no runtime in tests".to_string())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _cmd: &[String],
            _stdin: Option<&[u8]>,
            _timeout_secs: u64,
        ) -> Result<ExecOutput, String> {
            Err("no runtime in tests".to_string())
        }
        async fn inspect_running(&self, _container_id: &str) -> Result<bool, String> {
            Ok(false)
        }
        async fn stop(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }
    }

    fn agent_spec() -> AgentSpec {
        AgentSpec {
            namespace: "builtin".to_string(),
            name: "echo".to_string(),
            system_prompt: "You are a test agent.".to_string(),
            input_schema: Value::Null,
            output_schema: None,
            llm_provider_ref: None,
            model: None,
            temperature: 0.2,
            max_tokens: None,
            enabled_functions: Vec::new(),
            enabled_agents: Vec::new(),
            enabled_skills: Vec::new(),
            enabled_mcp_tools: Vec::new(),
            function_parameters: HashMap::new(),
            state_namespaces_readonly: Vec::new(),
            state_namespaces_readwrite: Vec::new(),
            initial_messages: Vec::new(),
        }
    }

    async fn build_engine(provider: ScriptedProvider, max_tool_call_depth: u32) -> (Arc<AgentEngine>, String) {
        let db = crate::database::init_in_memory().expect("in-memory db");
        let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DeadRuntime);
        let container_pool = Arc::new(ContainerPool::new(runtime.clone(), PoolConfig::default()));
        let worker_pool = Arc::new(SharedWorkerPool::new(runtime, crate::sandbox::WorkerPoolConfig::default()));
        let functions: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        let executor = Arc::new(Executor::new(db.clone(), functions.clone(), container_pool, worker_pool));
        let queue = Arc::new(crate::queue::JobQueue::new(db.clone(), bus, QueueConfig::default()));
        let state = Arc::new(StateStore::new(db.clone()));
        let loader = Arc::new(crate::skills::SkillLoader::new(None, None));
        let skills = Arc::new(SkillRegistry::new(loader));
        skills.initialize().await.expect("empty skill set initializes cleanly");
        let relay = Arc::new(StreamRelay::new(16));

        let mut providers = ProviderRegistry::new("scripted");
        providers.register("scripted", Arc::new(provider) as Arc<dyn LLMProvider>);

        let spec = AgentSpec { llm_provider_ref: Some("scripted".to_string()), ..agent_spec() };
        let agents: Arc<dyn AgentRegistry> = Arc::new(InMemoryAgentRegistry::new(vec![spec]));
        let synthesiser = Arc::new(ToolSynthesiser::new(functions, agents.clone()));

        let deps = AgentEngineDeps {
            db: db.clone(),
            agents,
            providers: Arc::new(providers),
            default_model: "test-model".to_string(),
            executor,
            queue,
            state,
            skills,
            relay,
            synthesiser,
            mcp_tools: Vec::new(),
            mcp: None,
            token_resolver: None,
            max_tool_call_depth,
        };
        let engine = AgentEngine::new(deps);

        let chat_id = Uuid::new_v4().to_string();
        let row = NewChat {
            id: chat_id.clone(),
            user_id: "user-1".to_string(),
            agent_namespace: "builtin".to_string(),
            agent_name: "echo".to_string(),
            agent_input_json: "{}".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut conn = db.get().expect("pooled connection");
        diesel::insert_into(chats_dsl::chats).values(&row).execute(&mut conn).expect("insert chat");

        (engine, chat_id)
    }

    #[tokio::test]
    async fn run_with_no_tool_calls_returns_final_content() {
        let provider = ScriptedProvider {
            chunks: vec![StreamChunk {
                delta: "hello there".to_string(),
                tool_call_deltas: Vec::new(),
                is_final: true,
                finish_reason: Some("stop".to_string()),
                usage: None,
            }],
        };
        let (engine, chat_id) = build_engine(provider, 10).await;
        let user = UserContext::new("user-1", HashMap::new());

        let result = engine.run(&chat_id, &user, "hi", None).await.expect("run succeeds");
        assert_eq!(result, "hello there");
    }

    #[tokio::test]
    async fn zero_depth_budget_fails_fast_without_calling_the_provider() {
        // `max_tool_call_depth: 0` must trip the depth guard on the very
        // first loop iteration. `ScriptedProvider` has no chunks queued,
        // so if the guard didn't run first this would return an empty
        // completion instead of `DepthExceeded`.
        let provider = ScriptedProvider { chunks: Vec::new() };
        let (engine, chat_id) = build_engine(provider, 0).await;
        let user = UserContext::new("user-1", HashMap::new());

        let err = engine.run(&chat_id, &user, "hi", None).await.unwrap_err();
        assert!(matches!(err, AgentEngineError::DepthExceeded));
    }

    #[tokio::test]
    async fn run_against_unknown_chat_returns_chat_not_found() {
        let provider = ScriptedProvider { chunks: Vec::new() };
        let (engine, _chat_id) = build_engine(provider, 10).await;
        let user = UserContext::new("user-1", HashMap::new());

        let err = engine.run("does-not-exist", &user, "hi", None).await.unwrap_err();
        assert!(matches!(err, AgentEngineError::ChatNotFound(id) if id == "does-not-exist"));
    }

    #[test]
    fn content_json_to_text_unwraps_plain_strings() {
        assert_eq!(content_json_to_text("\"hello\""), "hello");
    }

    #[test]
    fn content_json_to_text_passes_through_non_string_json() {
        assert_eq!(content_json_to_text("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn message_row_to_llm_maps_roles() {
        let row = MessageRow {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            role: "assistant".to_string(),
            content_json: "\"hi\"".to_string(),
            tool_calls_json: None,
            tool_call_id: None,
            name: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let msg: LlmMessage = message_row_to_llm(&row);
        assert!(matches!(msg.role, LlmRole::Assistant));
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn build_synthesis_inputs_partitions_by_default_enabled() {
        use crate::skills::{ComposeConfig, FeatureConfig, SkillDefinition, SkillRequirements, SkillTriggers};

        let make = |id: &str, default_enabled: bool| SkillDefinition {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            name: id.to_string(),
            description: String::new(),
            feature: FeatureConfig { category: "general".to_string(), default_enabled },
            requires: SkillRequirements::default(),
            triggers: SkillTriggers::default(),
            compose: ComposeConfig::default(),
            prompt_content: String::new(),
        };
        let skills = vec![make("a", true), make("b", false)];
        let inputs = build_synthesis_inputs(&skills, Vec::new(), Vec::new());
        assert_eq!(inputs.preloaded_skills.len(), 1);
        assert_eq!(inputs.on_demand_skills.len(), 1);
        assert_eq!(inputs.preloaded_skills[0].id, "a");
        assert_eq!(inputs.on_demand_skills[0].id, "b");
    }
}
