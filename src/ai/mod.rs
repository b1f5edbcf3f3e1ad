pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

pub use provider::{LLMProvider, ProviderFactory};
pub use providers::ProviderType;
pub use registry::ProviderRegistry;
pub use types::{
    CompletionRequest, CompletionResponse, Message, MessageRole, StreamChunk, TokenUsage,
    ToolCall, ToolCallDelta, ToolCallFunction, ToolDefinition, ToolFunctionDef,
};
