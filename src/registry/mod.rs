//! Read-only lookup of function and agent definitions by `namespace/name`.
//!
//! Function and agent authoring (admin UI, deploy pipeline) is outside the
//! core's scope; the core only needs to resolve a `function_ref`/`agent_ref`
//! to its spec. The default implementation loads specs once from a
//! directory of TOML files at startup (see `config::RegistryConfig`).

pub mod loader;
pub mod types;

use std::collections::HashMap;

pub use types::{parse_ref, AgentSpec, FunctionSpec, ParamOverride};

/// Resolves function definitions by ref.
pub trait FunctionRegistry: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<FunctionSpec>;
}

/// Resolves agent definitions by ref.
pub trait AgentRegistry: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<AgentSpec>;
}

/// An immutable in-memory registry, populated once from a directory scan.
pub struct InMemoryFunctionRegistry {
    specs: HashMap<(String, String), FunctionSpec>,
}

impl InMemoryFunctionRegistry {
    pub fn new(specs: Vec<FunctionSpec>) -> Self {
        Self {
            specs: specs
                .into_iter()
                .map(|s| ((s.namespace.clone(), s.name.clone()), s))
                .collect(),
        }
    }

    pub fn from_dir(dir: &std::path::Path) -> Result<Self, String> {
        Ok(Self::new(loader::load_function_specs(dir)?))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FunctionRegistry for InMemoryFunctionRegistry {
    fn get(&self, namespace: &str, name: &str) -> Option<FunctionSpec> {
        self.specs.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

pub struct InMemoryAgentRegistry {
    specs: HashMap<(String, String), AgentSpec>,
}

impl InMemoryAgentRegistry {
    pub fn new(specs: Vec<AgentSpec>) -> Self {
        Self {
            specs: specs
                .into_iter()
                .map(|s| ((s.namespace.clone(), s.name.clone()), s))
                .collect(),
        }
    }

    pub fn from_dir(dir: &std::path::Path) -> Result<Self, String> {
        Ok(Self::new(loader::load_agent_specs(dir)?))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn get(&self, namespace: &str, name: &str) -> Option<AgentSpec> {
        self.specs.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_function() -> FunctionSpec {
        FunctionSpec {
            namespace: "math".into(),
            name: "add".into(),
            code: "def add(i, ctx): return i['a'] + i['b']".into(),
            input_schema: json!({"type": "object"}),
            output_schema: None,
            enabled_namespaces: vec![],
            requires_approval: false,
            shared_pool: false,
            active: true,
        }
    }

    #[test]
    fn looks_up_by_namespace_and_name() {
        let reg = InMemoryFunctionRegistry::new(vec![sample_function()]);
        assert!(reg.get("math", "add").is_some());
        assert!(reg.get("math", "subtract").is_none());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = InMemoryFunctionRegistry::empty();
        assert!(reg.get("ns", "name").is_none());
    }
}
