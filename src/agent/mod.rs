//! Agent conversation engine: the tool-calling loop that turns a chat
//! message into an assistant reply, dispatching to functions, sub-agents,
//! skills, external protocol tools, and the state store along the way.
//!
//! # Key types
//! - [`AgentEngine`] — assembles context, streams from the LLM, dispatches
//!   tool calls, and parks on a pending approval row when a tool requires
//!   human sign-off.

pub mod engine;

pub use engine::{AgentEngine, AgentEngineDeps, AgentEngineError};
