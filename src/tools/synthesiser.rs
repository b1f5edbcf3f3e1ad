//! Builds the active tool list one agent turn sees, from the six sources an
//! `AgentSpec` can draw on: enabled functions, sub-agents, skills, external
//! protocol (MCP) tools, state namespaces, and paused-execution
//! continuations.
//!
//! Each synthesised tool carries a private [`ToolSource`] alongside the
//! provider-facing [`ToolDefinition`]; the source is stripped before the
//! definition is sent to the LLM and consulted again at dispatch time.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::ai::types::{ToolDefinition, ToolFunctionDef};
use crate::registry::{AgentRegistry, AgentSpec, FunctionRegistry, FunctionSpec, ParamOverride};
use crate::skills::SkillDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateToolKind {
    Save,
    Retrieve,
    Update,
    Delete,
}

impl StateToolKind {
    fn name(&self) -> &'static str {
        match self {
            StateToolKind::Save => "save_state",
            StateToolKind::Retrieve => "retrieve_state",
            StateToolKind::Update => "update_state",
            StateToolKind::Delete => "delete_state",
        }
    }
}

/// Dispatch-time routing information for one synthesised tool. Never sent
/// to the LLM provider.
#[derive(Debug, Clone)]
pub enum ToolSource {
    Function {
        namespace: String,
        name: String,
        /// `param -> value` for parameters the agent pinned, merged back in
        /// at dispatch regardless of what the LLM supplied.
        locked: HashMap<String, Value>,
        requires_approval: bool,
    },
    SubAgent {
        namespace: String,
        name: String,
    },
    SkillOnDemand {
        skill_id: String,
        content: String,
    },
    Mcp {
        server_id: String,
        tool_name: String,
    },
    State {
        kind: StateToolKind,
        readonly_namespaces: Vec<String>,
        readwrite_namespaces: Vec<String>,
    },
    Continuation {
        execution_ids: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SynthesisedTool {
    pub definition: ToolDefinition,
    pub source: ToolSource,
}

impl SynthesisedTool {
    pub fn requires_approval(&self) -> bool {
        matches!(self.source, ToolSource::Function { requires_approval: true, .. })
    }
}

/// One already-discovered external-protocol tool, as surfaced by whatever
/// owns the MCP client connections (feature `mcp-client`).
#[derive(Debug, Clone)]
pub struct McpToolHandle {
    pub server_id: String,
    pub tool_name: String,
    pub flattened_name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Everything an agent turn needs in order to synthesise its tool list,
/// beyond the `AgentSpec` itself.
#[derive(Default)]
pub struct SynthesisInputs<'a> {
    pub preloaded_skills: Vec<&'a SkillDefinition>,
    pub on_demand_skills: Vec<&'a SkillDefinition>,
    pub mcp_tools: Vec<McpToolHandle>,
    pub paused_execution_ids: Vec<String>,
}

pub struct ToolSynthesiser {
    functions: std::sync::Arc<dyn FunctionRegistry>,
    agents: std::sync::Arc<dyn AgentRegistry>,
}

impl ToolSynthesiser {
    pub fn new(functions: std::sync::Arc<dyn FunctionRegistry>, agents: std::sync::Arc<dyn AgentRegistry>) -> Self {
        Self { functions, agents }
    }

    /// Build the full active tool list for one turn, plus the rendered
    /// preload block to append to the system prompt (empty if none).
    pub fn synthesise(&self, agent: &AgentSpec, inputs: &SynthesisInputs) -> (Vec<SynthesisedTool>, String) {
        let mut tools = Vec::new();

        for function_ref in &agent.enabled_functions {
            if let Some(tool) = self.synthesise_function_tool(agent, function_ref) {
                tools.push(tool);
            }
        }

        for agent_ref in &agent.enabled_agents {
            if let Some(tool) = self.synthesise_sub_agent_tool(agent_ref) {
                tools.push(tool);
            }
        }

        for skill in &inputs.on_demand_skills {
            tools.push(synthesise_skill_tool(skill));
        }

        for handle in &inputs.mcp_tools {
            tools.push(synthesise_mcp_tool(handle));
        }

        if !agent.state_namespaces_readonly.is_empty() || !agent.state_namespaces_readwrite.is_empty() {
            tools.extend(synthesise_state_tools(
                &agent.state_namespaces_readonly,
                &agent.state_namespaces_readwrite,
            ));
        }

        if !inputs.paused_execution_ids.is_empty() {
            tools.push(synthesise_continuation_tool(&inputs.paused_execution_ids));
        }

        let preload_block = render_preload_block(&inputs.preloaded_skills);

        (tools, preload_block)
    }

    fn synthesise_function_tool(&self, agent: &AgentSpec, function_ref: &str) -> Option<SynthesisedTool> {
        let (namespace, name) = crate::registry::parse_ref(function_ref).ok()?;
        let spec = self.functions.get(namespace, name).filter(|f| f.active)?;

        let overrides = agent.function_parameters.get(function_ref);
        let (schema, locked) = project_schema(&spec, overrides);

        let flattened = format!("{namespace}__{name}");
        Some(SynthesisedTool {
            definition: ToolDefinition {
                kind: "function".to_string(),
                function: ToolFunctionDef {
                    name: flattened,
                    description: format!("Invoke the {function_ref} function."),
                    parameters: schema,
                },
            },
            source: ToolSource::Function {
                namespace: namespace.to_string(),
                name: name.to_string(),
                locked,
                requires_approval: spec.requires_approval,
            },
        })
    }

    /// The synthesised parameters are the target agent's own input schema,
    /// so the LLM can see exactly what that agent expects, plus a hidden
    /// `_agent_id` carried out-of-band via `ToolSource::SubAgent` (never
    /// added to the schema, never supplied by the LLM — the same locked-
    /// parameter treatment functions get in [`project_schema`]).
    fn synthesise_sub_agent_tool(&self, agent_ref: &str) -> Option<SynthesisedTool> {
        let (namespace, name) = crate::registry::parse_ref(agent_ref).ok()?;
        let target = self.agents.get(namespace, name)?;
        let flattened = format!("agent__{namespace}__{name}");

        let parameters = if target.input_schema.is_object() && target.input_schema.get("properties").is_some() {
            target.input_schema.clone()
        } else {
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        };

        Some(SynthesisedTool {
            definition: ToolDefinition {
                kind: "function".to_string(),
                function: ToolFunctionDef {
                    name: flattened,
                    description: format!("Delegate to the {agent_ref} sub-agent."),
                    parameters,
                },
            },
            source: ToolSource::SubAgent {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        })
    }
}

/// Remove locked parameters from the schema entirely (the LLM never sees
/// or supplies them); overridable parameters keep their slot but gain a
/// `default` and drop out of `required`.
fn project_schema(spec: &FunctionSpec, overrides: Option<&HashMap<String, ParamOverride>>) -> (Value, HashMap<String, Value>) {
    let mut schema = spec.input_schema.clone();
    let mut locked = HashMap::new();

    let Some(overrides) = overrides else { return (schema, locked) };

    let Some(object) = schema.as_object_mut() else {
        for (param, ov) in overrides {
            if ov.locked() {
                locked.insert(param.clone(), ov.value().clone());
            }
        }
        return (schema, locked);
    };

    let mut properties = object.get("properties").and_then(Value::as_object).cloned().unwrap_or_default();
    let mut required: Vec<String> = object
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    for (param, ov) in overrides {
        if ov.locked() {
            locked.insert(param.clone(), ov.value().clone());
            properties.remove(param);
            required.retain(|r| r != param);
        } else if let Some(prop) = properties.get_mut(param) {
            if let Some(prop_obj) = prop.as_object_mut() {
                prop_obj.insert("default".to_string(), ov.value().clone());
            }
            required.retain(|r| r != param);
        }
    }

    object.insert("properties".to_string(), Value::Object(properties));
    object.insert("required".to_string(), json!(required));

    (schema, locked)
}

fn synthesise_skill_tool(skill: &SkillDefinition) -> SynthesisedTool {
    let flattened = format!("get_skill_{}", sanitize(&skill.id));
    SynthesisedTool {
        definition: ToolDefinition {
            kind: "function".to_string(),
            function: ToolFunctionDef {
                name: flattened,
                description: skill.description.clone(),
                parameters: json!({"type": "object", "properties": {}}),
            },
        },
        source: ToolSource::SkillOnDemand {
            skill_id: skill.id.clone(),
            content: skill.prompt_content.clone(),
        },
    }
}

fn synthesise_mcp_tool(handle: &McpToolHandle) -> SynthesisedTool {
    SynthesisedTool {
        definition: ToolDefinition {
            kind: "function".to_string(),
            function: ToolFunctionDef {
                name: handle.flattened_name.clone(),
                description: handle.description.clone(),
                parameters: handle.input_schema.clone(),
            },
        },
        source: ToolSource::Mcp {
            server_id: handle.server_id.clone(),
            tool_name: handle.tool_name.clone(),
        },
    }
}

fn synthesise_state_tools(readonly: &[String], readwrite: &[String]) -> Vec<SynthesisedTool> {
    let all: Vec<String> = readonly.iter().chain(readwrite.iter()).cloned().collect();
    let kinds = [StateToolKind::Save, StateToolKind::Retrieve, StateToolKind::Update, StateToolKind::Delete];

    kinds
        .into_iter()
        .filter(|kind| *kind == StateToolKind::Retrieve || !readwrite.is_empty())
        .map(|kind| {
            let namespaces = if kind == StateToolKind::Retrieve { all.clone() } else { readwrite.to_vec() };
            SynthesisedTool {
                definition: ToolDefinition {
                    kind: "function".to_string(),
                    function: ToolFunctionDef {
                        name: kind.name().to_string(),
                        description: format!("{} for a key in one of this agent's state namespaces.", kind.name()),
                        parameters: json!({
                            "type": "object",
                            "properties": {
                                "namespace": {"type": "string", "enum": namespaces},
                                "key": {"type": "string"},
                                "value": {}
                            },
                            "required": ["namespace", "key"]
                        }),
                    },
                },
                source: ToolSource::State {
                    kind,
                    readonly_namespaces: readonly.to_vec(),
                    readwrite_namespaces: readwrite.to_vec(),
                },
            }
        })
        .collect()
}

fn synthesise_continuation_tool(execution_ids: &[String]) -> SynthesisedTool {
    SynthesisedTool {
        definition: ToolDefinition {
            kind: "function".to_string(),
            function: ToolFunctionDef {
                name: "continue_execution".to_string(),
                description: "Resume a paused execution awaiting input.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "execution_id": {"type": "string", "enum": execution_ids},
                        "input": {}
                    },
                    "required": ["execution_id", "input"]
                }),
            },
        },
        source: ToolSource::Continuation {
            execution_ids: execution_ids.to_vec(),
        },
    }
}

fn render_preload_block(skills: &[&SkillDefinition]) -> String {
    if skills.is_empty() {
        return String::new();
    }
    let mut block = String::from("\n\n# Preloaded skills\n");
    for skill in skills {
        block.push_str(&format!("\n## {}\n{}\n", skill.name, skill.prompt_content));
    }
    block
}

fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryAgentRegistry, InMemoryFunctionRegistry};
    use std::sync::Arc;

    fn no_agents() -> Arc<dyn AgentRegistry> {
        Arc::new(InMemoryAgentRegistry::empty())
    }

    fn agent_spec() -> AgentSpec {
        AgentSpec {
            namespace: "ns".into(),
            name: "demo".into(),
            system_prompt: "hi".into(),
            input_schema: json!({}),
            output_schema: None,
            llm_provider_ref: None,
            model: None,
            temperature: 0.7,
            max_tokens: None,
            enabled_functions: vec!["ops/send_email".to_string()],
            enabled_agents: vec![],
            enabled_skills: vec![],
            enabled_mcp_tools: vec![],
            function_parameters: HashMap::new(),
            state_namespaces_readonly: vec![],
            state_namespaces_readwrite: vec![],
            initial_messages: vec![],
        }
    }

    fn function_spec() -> FunctionSpec {
        FunctionSpec {
            namespace: "ops".into(),
            name: "send_email".into(),
            code: String::new(),
            input_schema: json!({
                "type": "object",
                "properties": {"to": {"type": "string"}, "from": {"type": "string"}},
                "required": ["to", "from"]
            }),
            output_schema: None,
            enabled_namespaces: vec![],
            requires_approval: false,
            shared_pool: false,
            active: true,
        }
    }

    #[test]
    fn function_tool_uses_flattened_name() {
        let registry: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::new(vec![function_spec()]));
        let synth = ToolSynthesiser::new(registry, no_agents());
        let (tools, _) = synth.synthesise(&agent_spec(), &SynthesisInputs::default());
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].definition.function.name, "ops__send_email");
    }

    #[test]
    fn locked_parameter_is_removed_from_schema() {
        let registry: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::new(vec![function_spec()]));
        let synth = ToolSynthesiser::new(registry, no_agents());
        let mut agent = agent_spec();
        let mut overrides = HashMap::new();
        overrides.insert("from".to_string(), ParamOverride::Full { value: json!("noreply@x.com"), locked: true });
        agent.function_parameters.insert("ops/send_email".to_string(), overrides);

        let (tools, _) = synth.synthesise(&agent, &SynthesisInputs::default());
        let params = &tools[0].definition.function.parameters;
        assert!(params["properties"].get("from").is_none());
        assert!(!params["required"].as_array().unwrap().iter().any(|v| v == "from"));
        match &tools[0].source {
            ToolSource::Function { locked, .. } => assert_eq!(locked.get("from"), Some(&json!("noreply@x.com"))),
            _ => panic!("expected function source"),
        }
    }

    #[test]
    fn overridable_parameter_gets_default_and_is_not_required() {
        let registry: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::new(vec![function_spec()]));
        let synth = ToolSynthesiser::new(registry, no_agents());
        let mut agent = agent_spec();
        let mut overrides = HashMap::new();
        overrides.insert("from".to_string(), ParamOverride::Full { value: json!("default@x.com"), locked: false });
        agent.function_parameters.insert("ops/send_email".to_string(), overrides);

        let (tools, _) = synth.synthesise(&agent, &SynthesisInputs::default());
        let params = &tools[0].definition.function.parameters;
        assert_eq!(params["properties"]["from"]["default"], json!("default@x.com"));
        assert!(!params["required"].as_array().unwrap().iter().any(|v| v == "from"));
    }

    #[test]
    fn continuation_tool_enumerates_paused_executions() {
        let registry: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        let synth = ToolSynthesiser::new(registry, no_agents());
        let mut agent = agent_spec();
        agent.enabled_functions.clear();
        let inputs = SynthesisInputs {
            paused_execution_ids: vec!["exec-1".to_string()],
            ..Default::default()
        };
        let (tools, _) = synth.synthesise(&agent, &inputs);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].definition.function.name, "continue_execution");
    }

    #[test]
    fn state_tools_synthesised_when_namespaces_present() {
        let registry: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        let synth = ToolSynthesiser::new(registry, no_agents());
        let mut agent = agent_spec();
        agent.enabled_functions.clear();
        agent.state_namespaces_readonly = vec!["scratch".to_string()];
        agent.state_namespaces_readwrite = vec!["memory".to_string()];
        let (tools, _) = synth.synthesise(&agent, &SynthesisInputs::default());
        let names: Vec<&str> = tools.iter().map(|t| t.definition.function.name.as_str()).collect();
        assert!(names.contains(&"retrieve_state"));
        assert!(names.contains(&"save_state"));
        assert!(names.contains(&"delete_state"));
    }

    #[test]
    fn sub_agent_tool_exposes_target_input_schema() {
        let functions: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        let target = AgentSpec {
            namespace: "billing".into(),
            name: "refund".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"order_id": {"type": "string"}, "amount": {"type": "number"}},
                "required": ["order_id"]
            }),
            ..agent_spec()
        };
        let agents: Arc<dyn AgentRegistry> = Arc::new(InMemoryAgentRegistry::new(vec![target]));
        let synth = ToolSynthesiser::new(functions, agents);

        let mut agent = agent_spec();
        agent.enabled_functions.clear();
        agent.enabled_agents = vec!["billing/refund".to_string()];

        let (tools, _) = synth.synthesise(&agent, &SynthesisInputs::default());
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].definition.function.name, "agent__billing__refund");
        let params = &tools[0].definition.function.parameters;
        assert!(params["properties"].get("order_id").is_some());
        assert!(params["properties"].get("_agent_id").is_none());
        match &tools[0].source {
            ToolSource::SubAgent { namespace, name } => {
                assert_eq!(namespace, "billing");
                assert_eq!(name, "refund");
            }
            _ => panic!("expected sub-agent source"),
        }
    }

    #[test]
    fn sub_agent_tool_falls_back_to_message_when_target_has_no_schema() {
        let functions: Arc<dyn FunctionRegistry> = Arc::new(InMemoryFunctionRegistry::empty());
        let target = AgentSpec { namespace: "support".into(), name: "triage".into(), ..agent_spec() };
        let agents: Arc<dyn AgentRegistry> = Arc::new(InMemoryAgentRegistry::new(vec![target]));
        let synth = ToolSynthesiser::new(functions, agents);

        let mut agent = agent_spec();
        agent.enabled_functions.clear();
        agent.enabled_agents = vec!["support/triage".to_string()];

        let (tools, _) = synth.synthesise(&agent, &SynthesisInputs::default());
        let params = &tools[0].definition.function.parameters;
        assert_eq!(params["properties"]["message"]["type"], json!("string"));
    }
}
