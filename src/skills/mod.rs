//! Markdown-defined skills: reusable prompt fragments an agent can enable
//! by reference (`enabled_skills[]`), either preloaded into the system
//! prompt or exposed as on-demand `get_skill_*` tools.
//!
//! # Key components
//!
//! - [`types`]: skill definition shape (frontmatter + prompt content).
//! - [`loader`]: parses skill files from markdown + YAML frontmatter, local
//!   directory and/or remote source.
//! - [`registry`]: central index of loaded skills, held by [`crate::Core`]
//!   and consulted by [`crate::agent::engine::AgentEngine`] when
//!   synthesising tools for a turn.
//! - [`error`]: error types for loading/looking up skills.

pub mod error;
pub mod loader;
pub mod registry;
pub mod types;

pub use error::{SkillError, SkillResult};
pub use loader::SkillLoader;
pub use registry::SkillRegistry;
pub use types::*;
