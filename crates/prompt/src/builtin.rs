//! Built-in answer prompts, one per answer mode.
//!
//! The YAML sources live in `crates/prompt/prompts/` and are compiled in.

use crate::types::PromptDefinition;
use ragbridge_core::{AppError, AppResult};

pub const ANSWER_RAG: &str = "answer.rag";
pub const ANSWER_HYBRID: &str = "answer.hybrid";
pub const ANSWER_KNOWLEDGE: &str = "answer.knowledge";

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (ANSWER_RAG, include_str!("../prompts/answer.rag.yml")),
    (ANSWER_HYBRID, include_str!("../prompts/answer.hybrid.yml")),
    (ANSWER_KNOWLEDGE, include_str!("../prompts/answer.knowledge.yml")),
];

/// Shared template fragments available to every prompt as `{{> name}}`.
pub const PARTIALS: &[(&str, &str)] = &[
    (
        "security_rules",
        include_str!("../prompts/partials/security_rules.hbs"),
    ),
    (
        "answer_requirements",
        include_str!("../prompts/partials/answer_requirements.hbs"),
    ),
];

/// IDs of all compiled-in prompts.
pub fn builtin_ids() -> Vec<&'static str> {
    BUILTIN_SOURCES.iter().map(|(id, _)| *id).collect()
}

/// Parse a compiled-in prompt, if one exists under this ID.
pub fn builtin_prompt(prompt_id: &str) -> AppResult<Option<PromptDefinition>> {
    let Some((_, source)) = BUILTIN_SOURCES.iter().find(|(id, _)| *id == prompt_id) else {
        return Ok(None);
    };

    let definition: PromptDefinition = serde_yaml::from_str(source).map_err(|e| {
        AppError::Prompt(format!("Built-in prompt {} is invalid: {}", prompt_id, e))
    })?;
    Ok(Some(definition))
}
