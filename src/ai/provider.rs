use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Result type for AI operations
pub type Result<T> = std::result::Result<T, String>;

use super::types::{CompletionRequest, CompletionResponse, StreamChunk};

/// Type alias for streaming response
pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Trait for LLM providers.
///
/// `complete`/`stream` already return the canonical `tool_calls`/`usage`
/// shape (see `ai::types`), so there is no separate `format_tool_calls` /
/// `extract_usage` step here: each concrete provider does that normalisation
/// internally while parsing its own wire format, rather than exposing a raw
/// response for a second pass.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Complete a prompt and return the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Stream a completion response
    async fn stream(&self, request: CompletionRequest) -> Result<StreamResponse>;

    /// Get the context window limit for this provider
    fn context_limit(&self) -> usize;

    /// Check if this provider supports function/tool calling
    fn supports_tools(&self) -> bool;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Pre-establish connection to provider. Default no-op; providers may override.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating LLM providers from a provider id + API key.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider from its registry id (e.g. `"vercel-ai-gateway"`, `"openrouter"`).
    pub fn create(
        provider_type: &str,
        api_key: &str,
        base_url: Option<&str>,
        default_model: Option<&str>,
    ) -> Result<Arc<dyn LLMProvider>> {
        let kind = super::providers::ProviderType::from_id(provider_type)
            .ok_or_else(|| format!("unknown provider id: {provider_type}"))?;
        super::providers::create_provider(kind, api_key, base_url, default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_factory_unknown_id() {
        let result = ProviderFactory::create("not-a-real-provider", "key", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_factory_known_id() {
        let result = ProviderFactory::create("openrouter", "key", None, None);
        assert!(result.is_ok());
    }
}
