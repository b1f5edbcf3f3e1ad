//! Routes one LLM-emitted tool call to its source: a queued function, a
//! sub-agent, a skill, an external protocol server, the state store, or a
//! paused-execution continuation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::executor::Executor;
use crate::queue::JobQueue;
use crate::security::permissions::{function_execute_permission, UserContext};
use crate::state::StateStore;

use super::synthesiser::{StateToolKind, SynthesisedTool, ToolSource};

/// Implemented by whatever runs a sub-agent conversation (`agent::engine::AgentEngine`).
/// Lives here, rather than being imported from `agent`, so `tools` never
/// depends on `agent` — `agent` depends on `tools` instead.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    async fn run_sub_agent(
        &self,
        namespace: &str,
        name: &str,
        input: Value,
        user: &UserContext,
        parent_chat_id: &str,
    ) -> Result<String, String>;
}

/// Implemented by whatever can reach an MCP server's `tools/call` (feature `mcp-client`).
#[async_trait]
pub trait McpCaller: Send + Sync {
    async fn call(&self, server_id: &str, tool_name: &str, arguments: Value) -> Result<Value, String>;
}

pub struct ToolDispatcher {
    executor: Arc<Executor>,
    queue: Arc<JobQueue>,
    state: Arc<StateStore>,
    sub_agents: Option<Arc<dyn SubAgentRunner>>,
    mcp: Option<Arc<dyn McpCaller>>,
}

impl ToolDispatcher {
    pub fn new(
        executor: Arc<Executor>,
        queue: Arc<JobQueue>,
        state: Arc<StateStore>,
        sub_agents: Option<Arc<dyn SubAgentRunner>>,
        mcp: Option<Arc<dyn McpCaller>>,
    ) -> Self {
        Self { executor, queue, state, sub_agents, mcp }
    }

    /// Dispatch one tool call. `raw_arguments` is the LLM's raw (possibly
    /// empty or malformed) JSON string; the returned string is always a
    /// valid tool-result payload, never an `Err` for an LLM-caused mistake
    /// — only infrastructure failures propagate as `Err`.
    pub async fn dispatch(
        &self,
        active_tools: &HashMap<String, SynthesisedTool>,
        tool_name: &str,
        raw_arguments: &str,
        user: &UserContext,
        chat_id: &str,
    ) -> Result<String, String> {
        let Some(tool) = active_tools.get(tool_name) else {
            tracing::warn!(tool = tool_name, user_id = %user.user_id, "tool dispatch: LLM called a tool not in the active list");
            return Ok(tool_error_json("tool is not available in this conversation"));
        };

        let arguments: Value = if raw_arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_arguments) {
                Ok(v) => v,
                Err(_) => return Ok(tool_error_json("invalid JSON")),
            }
        };

        match &tool.source {
            ToolSource::Function { namespace, name, locked, .. } => {
                self.dispatch_function(namespace, name, arguments, locked, user, chat_id).await
            }
            ToolSource::SubAgent { namespace, name } => self.dispatch_sub_agent(namespace, name, arguments, user, chat_id).await,
            ToolSource::SkillOnDemand { content, .. } => Ok(content.clone()),
            ToolSource::Mcp { server_id, tool_name } => self.dispatch_mcp(server_id, tool_name, arguments).await,
            ToolSource::State { kind, readonly_namespaces, readwrite_namespaces } => {
                self.dispatch_state(*kind, readonly_namespaces, readwrite_namespaces, arguments, user).await
            }
            ToolSource::Continuation { execution_ids } => self.dispatch_continuation(execution_ids, arguments, user, chat_id).await,
        }
    }

    async fn dispatch_function(
        &self,
        namespace: &str,
        name: &str,
        llm_args: Value,
        locked: &HashMap<String, Value>,
        user: &UserContext,
        chat_id: &str,
    ) -> Result<String, String> {
        let merged = merge_parameters(llm_args, locked);

        let permission = function_execute_permission(namespace, name, "own");
        if !user.has_permission(&permission) {
            return Ok(tool_error_json("permission denied"));
        }

        let execution_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .queue
            .enqueue_and_wait(
                namespace,
                name,
                merged,
                execution_id,
                "agent_tool_call",
                chat_id,
                user.user_id.clone(),
                Some(chat_id.to_string()),
                None,
            )
            .await;

        match result {
            Ok(value) => Ok(value.to_string()),
            Err(e) => Ok(tool_error_json(&e.to_string())),
        }
    }

    async fn dispatch_sub_agent(
        &self,
        namespace: &str,
        name: &str,
        arguments: Value,
        user: &UserContext,
        chat_id: &str,
    ) -> Result<String, String> {
        let Some(runner) = &self.sub_agents else {
            return Ok(tool_error_json("sub-agent dispatch is not configured"));
        };
        match runner.run_sub_agent(namespace, name, arguments, user, chat_id).await {
            Ok(output) => Ok(output),
            Err(e) => Ok(tool_error_json(&e)),
        }
    }

    async fn dispatch_mcp(&self, server_id: &str, tool_name: &str, arguments: Value) -> Result<String, String> {
        let Some(mcp) = &self.mcp else {
            return Ok(tool_error_json("external protocol tools are not configured"));
        };
        match mcp.call(server_id, tool_name, arguments).await {
            Ok(value) => Ok(value.to_string()),
            Err(e) => Ok(tool_error_json(&e)),
        }
    }

    async fn dispatch_state(
        &self,
        kind: StateToolKind,
        readonly_namespaces: &[String],
        readwrite_namespaces: &[String],
        arguments: Value,
        user: &UserContext,
    ) -> Result<String, String> {
        let Some(namespace) = arguments.get("namespace").and_then(Value::as_str) else {
            return Ok(tool_error_json("missing 'namespace'"));
        };
        let Some(key) = arguments.get("key").and_then(Value::as_str) else {
            return Ok(tool_error_json("missing 'key'"));
        };

        let writable = readwrite_namespaces.iter().any(|n| n == namespace);
        let readable = writable || readonly_namespaces.iter().any(|n| n == namespace);

        let outcome = match kind {
            StateToolKind::Retrieve => {
                if !readable {
                    return Ok(tool_error_json("namespace not readable by this agent"));
                }
                self.state.get(&user.user_id, namespace, key).await.map(|v| v.unwrap_or(Value::Null))
            }
            StateToolKind::Save | StateToolKind::Update => {
                if !writable {
                    return Ok(tool_error_json("namespace not writable by this agent"));
                }
                let value = arguments.get("value").cloned().unwrap_or(Value::Null);
                let result = if matches!(kind, StateToolKind::Save) {
                    self.state.set(&user.user_id, namespace, key, value).await
                } else {
                    self.state.update(&user.user_id, namespace, key, value).await
                };
                result.map(|_| Value::Bool(true))
            }
            StateToolKind::Delete => {
                if !writable {
                    return Ok(tool_error_json("namespace not writable by this agent"));
                }
                self.state.delete(&user.user_id, namespace, key).await.map(Value::Bool)
            }
        };

        match outcome {
            Ok(value) => Ok(value.to_string()),
            Err(e) => Ok(tool_error_json(&e.to_string())),
        }
    }

    async fn dispatch_continuation(
        &self,
        execution_ids: &[String],
        arguments: Value,
        user: &UserContext,
        chat_id: &str,
    ) -> Result<String, String> {
        let Some(execution_id) = arguments.get("execution_id").and_then(Value::as_str) else {
            return Ok(tool_error_json("missing 'execution_id'"));
        };
        if !execution_ids.iter().any(|id| id == execution_id) {
            return Ok(tool_error_json("execution_id is not one of this chat's paused executions"));
        }
        let resume_data = arguments.get("input").cloned().unwrap_or(Value::Null);

        let function_ref = match self.executor.function_ref_for_execution(execution_id).await {
            Ok(r) => r,
            Err(e) => return Ok(tool_error_json(&e.to_string())),
        };

        let result = self
            .executor
            .execute_function(
                &function_ref,
                Value::Null,
                execution_id,
                "continuation",
                chat_id,
                &user.user_id,
                Some(chat_id),
                Some(resume_data),
            )
            .await;

        match result {
            Ok(value) => Ok(value.to_string()),
            Err(e) => Ok(tool_error_json(&e.to_string())),
        }
    }
}

/// Precedence: LLM args (lowest) ← locked values (highest). Overridable
/// defaults are already baked into the schema the LLM saw, so they only
/// need to win when the LLM omitted the field entirely — which `serde`
/// already handles by leaving it absent; nothing further to merge here.
fn merge_parameters(llm_args: Value, locked: &HashMap<String, Value>) -> Value {
    let mut merged = llm_args;
    if !merged.is_object() {
        merged = Value::Object(Default::default());
    }
    let object = merged.as_object_mut().expect("just ensured object");
    for (param, value) in locked {
        if object.contains_key(param) {
            tracing::warn!(param, "tool dispatch: LLM attempted to supply a locked parameter, ignoring");
        }
        object.insert(param.clone(), value.clone());
    }
    merged
}

fn tool_error_json(message: &str) -> String {
    serde_json::json!({"error": message}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_locked_parameter_overrides_llm_value() {
        let llm_args = json!({"to": "user@x.com", "from": "attacker@evil.com"});
        let mut locked = HashMap::new();
        locked.insert("from".to_string(), json!("noreply@x.com"));

        let merged = merge_parameters(llm_args, &locked);
        assert_eq!(merged["from"], json!("noreply@x.com"));
        assert_eq!(merged["to"], json!("user@x.com"));
    }

    #[test]
    fn merge_locked_parameter_adds_when_absent() {
        let llm_args = json!({"to": "user@x.com"});
        let mut locked = HashMap::new();
        locked.insert("from".to_string(), json!("noreply@x.com"));

        let merged = merge_parameters(llm_args, &locked);
        assert_eq!(merged["from"], json!("noreply@x.com"));
    }

    #[test]
    fn tool_error_json_shape() {
        let err = tool_error_json("boom");
        let parsed: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(parsed["error"], json!("boom"));
    }
}
