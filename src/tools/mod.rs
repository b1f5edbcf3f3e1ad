pub mod dispatch;
pub mod registry;
pub mod synthesiser;
pub mod traits;

pub use dispatch::{McpCaller, SubAgentRunner, ToolDispatcher};
pub use registry::ToolRegistry;
pub use synthesiser::{McpToolHandle, StateToolKind, SynthesisedTool, SynthesisInputs, ToolSource, ToolSynthesiser};
pub use traits::{Tool, ToolInfo, ToolResult};
