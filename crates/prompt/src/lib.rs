//! Prompt system for Ragbridge.
//!
//! - YAML-based prompt definitions (built-in per answer mode, overridable per workspace)
//! - Handlebars template rendering with shared partials

pub mod builder;
pub mod builtin;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::{build_prompt, render_template};
pub use builtin::{ANSWER_HYBRID, ANSWER_KNOWLEDGE, ANSWER_RAG};
pub use loader::{list_prompts, load_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, GenerationHints, PromptDefinition};
