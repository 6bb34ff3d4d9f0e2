//! Prompt types for Ragbridge.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An answer prompt loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt identifier, e.g. `answer.rag`
    pub id: String,

    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    #[serde(rename = "createdBy", default)]
    pub created_by: String,

    /// Variables the caller must supply
    #[serde(default)]
    pub requires: Vec<String>,

    /// Optional system message template (Handlebars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// User message template (Handlebars)
    pub template: String,

    /// Per-prompt overrides of the engine's generation settings
    #[serde(default)]
    pub generation: GenerationHints,
}

impl PromptDefinition {
    /// Required variables absent from `variables`, in declaration order.
    pub fn missing_variables<'a>(&'a self, variables: &HashMap<String, String>) -> Vec<&'a str> {
        self.requires
            .iter()
            .filter(|name| !variables.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(rename = "maxTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A rendered prompt ready for the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPrompt {
    pub system: Option<String>,

    pub user: String,

    pub generation: GenerationHints,

    pub metadata: BuiltPromptMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPromptMetadata {
    #[serde(rename = "sourcePromptId")]
    pub source_prompt_id: String,

    /// Template variables that were resolved
    #[serde(rename = "resolvedVariables")]
    pub resolved_variables: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_definition_deserialization() {
        let yaml = r#"
id: answer.custom
title: Custom answer
apiVersion: "1.0"
createdBy: workspace
requires: [query, context]
system: "You answer questions."
template: "{{context}}\n{{query}}"
generation:
  temperature: 0.1
  maxTokens: 256
"#;

        let def: PromptDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "answer.custom");
        assert_eq!(def.requires, vec!["query", "context"]);
        assert_eq!(def.system.as_deref(), Some("You answer questions."));
        assert_eq!(def.generation.temperature, Some(0.1));
        assert_eq!(def.generation.max_tokens, Some(256));
    }

    #[test]
    fn test_optional_fields_default() {
        let yaml = r#"
id: bare
title: Bare
apiVersion: "1.0"
template: "{{query}}"
"#;

        let def: PromptDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.system.is_none());
        assert!(def.created_by.is_empty());
        assert!(def.requires.is_empty());
        assert_eq!(def.generation, GenerationHints::default());
    }

    #[test]
    fn test_missing_variables() {
        let def: PromptDefinition = serde_yaml::from_str(
            "id: x\ntitle: X\napiVersion: \"1.0\"\nrequires: [query, context]\ntemplate: t\n",
        )
        .unwrap();

        let mut vars = HashMap::new();
        vars.insert("query".to_string(), "q".to_string());
        assert_eq!(def.missing_variables(&vars), vec!["context"]);

        vars.insert("context".to_string(), "c".to_string());
        assert!(def.missing_variables(&vars).is_empty());
    }
}
