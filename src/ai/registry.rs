//! Keyed lookup of constructed providers — "a provider registry keyed by
//! provider name" per the factory contract in [`super::provider::ProviderFactory`].
//! Construction (API key handling, base URL) happens once at startup; this
//! is just the resolve step the agent engine uses per turn.

use std::collections::HashMap;
use std::sync::Arc;

use super::provider::LLMProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    default_id: String,
}

impl ProviderRegistry {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_id: default_id.into(),
        }
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(id.into(), provider);
    }

    /// Resolve by explicit id if given, otherwise the configured default.
    /// `None` means the id (explicit or default) has no registered provider.
    pub fn resolve(&self, requested: Option<&str>) -> Option<Arc<dyn LLMProvider>> {
        let id = requested.unwrap_or(&self.default_id);
        self.providers.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn complete(&self, _request: CompletionRequest) -> super::super::provider::Result<CompletionResponse> {
            Ok(CompletionResponse::default())
        }
        async fn stream(&self, _request: CompletionRequest) -> super::super::provider::Result<super::super::provider::StreamResponse> {
            Err("not implemented".to_string())
        }
        fn context_limit(&self) -> usize {
            128_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn resolves_explicit_id() {
        let mut reg = ProviderRegistry::new("default-provider");
        reg.register("openrouter", Arc::new(StubProvider));
        assert!(reg.resolve(Some("openrouter")).is_some());
    }

    #[test]
    fn falls_back_to_default_when_none_requested() {
        let mut reg = ProviderRegistry::new("openrouter");
        reg.register("openrouter", Arc::new(StubProvider));
        assert!(reg.resolve(None).is_some());
    }

    #[test]
    fn unknown_id_resolves_to_none() {
        let reg = ProviderRegistry::new("openrouter");
        assert!(reg.resolve(Some("nonexistent")).is_none());
    }
}
