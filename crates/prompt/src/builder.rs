//! Prompt builder for rendering templates.

use crate::builtin::PARTIALS;
use crate::types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition};
use handlebars::Handlebars;
use ragbridge_core::{AppError, AppResult};
use std::collections::HashMap;

/// Build a prompt from a definition and input variables.
///
/// Both the system and the user templates are rendered with the same
/// variables; shared partials (`{{> security_rules}}`,
/// `{{> answer_requirements}}`) are available to both.
///
/// # Example
/// ```no_run
/// use ragbridge_prompt::{build_prompt, load_prompt};
/// use std::collections::HashMap;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let def = load_prompt(Path::new("."), "answer.knowledge")?;
/// let mut vars = HashMap::new();
/// vars.insert("query".to_string(), "What is Rust?".to_string());
///
/// let built = build_prompt(&def, vars)?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(
    definition: &PromptDefinition,
    variables: HashMap<String, String>,
) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building prompt: {}", definition.id);

    let missing = definition.missing_variables(&variables);
    if !missing.is_empty() {
        return Err(AppError::Prompt(format!(
            "Prompt {} is missing required variables: {}",
            definition.id,
            missing.join(", ")
        )));
    }

    let handlebars = registry()?;

    let system = match definition.system {
        Some(ref template) => Some(render_with(&handlebars, template, &variables)?),
        None => None,
    };
    let user = render_with(&handlebars, &definition.template, &variables)?;

    Ok(BuiltPrompt {
        system,
        user,
        generation: definition.generation.clone(),
        metadata: BuiltPromptMetadata {
            source_prompt_id: definition.id.clone(),
            resolved_variables: variables,
        },
    })
}

/// Render a Handlebars template with variables.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> AppResult<String> {
    render_with(&registry()?, template, variables)
}

fn registry() -> AppResult<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    for (name, partial) in PARTIALS {
        handlebars
            .register_partial(name, *partial)
            .map_err(|e| AppError::Prompt(format!("Failed to register partial {}: {}", name, e)))?;
    }

    Ok(handlebars)
}

fn render_with(
    handlebars: &Handlebars<'_>,
    template: &str,
    variables: &HashMap<String, String>,
) -> AppResult<String> {
    let rendered = handlebars
        .render_template(template, variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{builtin_prompt, ANSWER_KNOWLEDGE, ANSWER_RAG};
    use crate::types::GenerationHints;

    fn create_test_definition(system: Option<&str>) -> PromptDefinition {
        PromptDefinition {
            id: "test.prompt".to_string(),
            title: "Test".to_string(),
            api_version: "1.0".to_string(),
            created_by: "test".to_string(),
            requires: Vec::new(),
            system: system.map(str::to_string),
            template: "Question: {{query}}".to_string(),
            generation: GenerationHints::default(),
        }
    }

    #[test]
    fn test_render_simple_template() {
        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "Hello, <world>!".to_string());

        let result = render_template("Question: {{query}}", &vars).unwrap();
        assert_eq!(result, "Question: Hello, <world>!");
    }

    #[test]
    fn test_build_prompt_without_system() {
        let def = create_test_definition(None);
        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "Test question".to_string());

        let built = build_prompt(&def, vars).unwrap();
        assert_eq!(built.user, "Question: Test question");
        assert!(built.system.is_none());
        assert_eq!(built.metadata.source_prompt_id, "test.prompt");
    }

    #[test]
    fn test_build_prompt_with_partial_in_system() {
        let def = create_test_definition(Some("Rules:\n{{> security_rules}}"));
        let built = build_prompt(&def, HashMap::new()).unwrap();

        let system = built.system.unwrap();
        assert!(system.starts_with("Rules:"));
        assert!(system.contains("Security rules"));
    }

    #[test]
    fn test_builtin_rag_prompt_renders_context() {
        let def = builtin_prompt(ANSWER_RAG).unwrap().unwrap();
        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "Who wrote it?".to_string());
        vars.insert("context".to_string(), "[1] Written by Ada.".to_string());

        let built = build_prompt(&def, vars).unwrap();
        assert!(built.user.contains("[1] Written by Ada."));
        assert!(built.user.contains("Who wrote it?"));
        assert!(built.user.contains("Answer requirements"));
        assert!(built.system.unwrap().contains("Security rules"));
    }

    #[test]
    fn test_builtin_knowledge_prompt_ignores_context() {
        let def = builtin_prompt(ANSWER_KNOWLEDGE).unwrap().unwrap();
        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "What is RRF?".to_string());
        vars.insert("context".to_string(), "SHOULD NOT APPEAR".to_string());

        let built = build_prompt(&def, vars).unwrap();
        assert!(!built.user.contains("SHOULD NOT APPEAR"));
        assert!(built.user.contains("general knowledge"));
    }

    #[test]
    fn test_missing_required_variable_is_an_error() {
        let def = builtin_prompt(ANSWER_RAG).unwrap().unwrap();
        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "Who wrote it?".to_string());

        let err = build_prompt(&def, vars).unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn test_generation_hints_are_carried() {
        let mut def = create_test_definition(None);
        def.generation.max_tokens = Some(64);

        let built = build_prompt(&def, HashMap::new()).unwrap();
        assert_eq!(built.generation.max_tokens, Some(64));
        assert!(built.generation.temperature.is_none());
    }

    #[test]
    fn test_render_template_missing_variable() {
        let vars = HashMap::new();
        let result = render_template("Question: {{missing}}", &vars);
        // Handlebars renders missing variables as empty string
        assert!(result.is_ok());
    }
}
