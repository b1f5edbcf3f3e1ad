//! Function and agent definitions, as authored outside the core (an admin
//! UI or a deploy pipeline) and loaded here as read-only specs keyed by
//! `namespace/name`. The core never mutates these — see `registry::loader`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One locked-or-overridable argument an agent pins for a function it calls.
///
/// Accepts the canonical `{value, locked}` object as well as a bare JSON
/// value (legacy shorthand), treated as `locked = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamOverride {
    Full { value: Value, locked: bool },
    Bare(Value),
}

impl ParamOverride {
    pub fn value(&self) -> &Value {
        match self {
            ParamOverride::Full { value, .. } => value,
            ParamOverride::Bare(value) => value,
        }
    }

    pub fn locked(&self) -> bool {
        match self {
            ParamOverride::Full { locked, .. } => *locked,
            ParamOverride::Bare(_) => false,
        }
    }
}

/// A user-authored function runnable inside a sandbox container or the
/// shared worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub namespace: String,
    pub name: String,
    /// Source text in the sandbox executor's language.
    pub code: String,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// State namespaces this function is permitted to touch when called as
    /// a tool; distinct from the state namespaces synthesised on an agent.
    #[serde(default)]
    pub enabled_namespaces: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Trusted, platform-owned functions may run in the long-lived shared
    /// worker pool instead of a scrubbed-per-call sandbox container.
    #[serde(default)]
    pub shared_pool: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl FunctionSpec {
    pub fn function_ref(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// An LLM-driven conversational agent: system prompt template plus the set
/// of tools it is allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub namespace: String,
    pub name: String,
    /// Jinja/Tera-style template, rendered with the chat's `agent_input`.
    pub system_prompt: String,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub llm_provider_ref: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub enabled_functions: Vec<String>,
    #[serde(default)]
    pub enabled_agents: Vec<String>,
    #[serde(default)]
    pub enabled_skills: Vec<String>,
    #[serde(default)]
    pub enabled_mcp_tools: Vec<String>,
    /// `function_ref -> {param_name -> override}`.
    #[serde(default)]
    pub function_parameters: HashMap<String, HashMap<String, ParamOverride>>,
    #[serde(default)]
    pub state_namespaces_readonly: Vec<String>,
    #[serde(default)]
    pub state_namespaces_readwrite: Vec<String>,
    #[serde(default)]
    pub initial_messages: Vec<String>,
}

impl AgentSpec {
    pub fn agent_ref(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Every state namespace this agent may read, readonly or readwrite.
    pub fn all_readable_namespaces(&self) -> Vec<&str> {
        self.state_namespaces_readonly
            .iter()
            .chain(self.state_namespaces_readwrite.iter())
            .map(String::as_str)
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

/// Split `"namespace/name"` into its parts. Errors if there isn't exactly
/// one `/`.
pub fn parse_ref(reference: &str) -> Result<(&str, &str), String> {
    let mut parts = reference.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => Err(format!("invalid ref '{reference}', expected 'namespace/name'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_override_bare_is_unlocked() {
        let p: ParamOverride = serde_json::from_value(serde_json::json!("hello")).unwrap();
        assert_eq!(p.value(), &Value::String("hello".into()));
        assert!(!p.locked());
    }

    #[test]
    fn param_override_full_object() {
        let p: ParamOverride =
            serde_json::from_value(serde_json::json!({"value": "x", "locked": true})).unwrap();
        assert_eq!(p.value(), &Value::String("x".into()));
        assert!(p.locked());
    }

    #[test]
    fn parse_ref_splits_namespace_and_name() {
        assert_eq!(parse_ref("ops/delete_user").unwrap(), ("ops", "delete_user"));
        assert!(parse_ref("no-slash").is_err());
        assert!(parse_ref("/name").is_err());
    }
}
