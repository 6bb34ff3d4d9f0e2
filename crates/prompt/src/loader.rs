//! Prompt loader: workspace overrides first, then built-ins.

use crate::builtin::{builtin_ids, builtin_prompt};
use crate::types::PromptDefinition;
use ragbridge_core::config::STATE_DIR;
use ragbridge_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

fn prompts_dir(workspace_path: &Path) -> PathBuf {
    workspace_path.join(STATE_DIR).join("prompts")
}

/// Load a prompt definition by ID.
///
/// A file named `<id>.yml` in `.ragbridge/prompts/` overrides the
/// compiled-in prompt of the same ID.
///
/// # Example
/// ```no_run
/// use ragbridge_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "answer.rag")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    if !prompt_file.exists() {
        return match builtin_prompt(prompt_id)? {
            Some(definition) => Ok(definition),
            None => Err(AppError::Prompt(format!(
                "Prompt not found: {} (no built-in and no {:?})",
                prompt_id, prompt_file
            ))),
        };
    }

    tracing::debug!("Loading prompt override from: {:?}", prompt_file);

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition: PromptDefinition = serde_yaml::from_str(&contents).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to parse prompt YAML {:?}: {}",
            prompt_file, e
        ))
    })?;

    validate_prompt(&definition)?;

    if definition.id != prompt_id {
        return Err(AppError::Prompt(format!(
            "Prompt file {:?} declares id {} but was loaded as {}",
            prompt_file, definition.id, prompt_id
        )));
    }

    tracing::info!("Loaded prompt override: {} ({})", definition.id, definition.title);

    Ok(definition)
}

/// List all available prompt IDs: built-ins plus workspace files.
pub fn list_prompts(workspace_path: &Path) -> AppResult<Vec<String>> {
    let mut prompt_ids: Vec<String> = builtin_ids().into_iter().map(String::from).collect();

    let dir = prompts_dir(workspace_path);
    if dir.exists() {
        for entry in walkdir::WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("yml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    prompt_ids.push(stem.to_string());
                }
            }
        }
    }

    prompt_ids.sort();
    prompt_ids.dedup();
    Ok(prompt_ids)
}

/// Validate a prompt definition.
fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if def.template.is_empty() {
        return Err(AppError::Prompt(
            "Prompt template cannot be empty".to_string(),
        ));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_prompt(dir: &Path, id: &str, valid: bool) -> PathBuf {
        let prompts_dir = prompts_dir(dir);
        fs::create_dir_all(&prompts_dir).unwrap();

        let content = if valid {
            format!(
                r#"
id: {}
title: "Custom Prompt"
apiVersion: "1.0"
createdBy: test
requires: [query]
template: "Custom: {{{{query}}}}"
generation:
  temperature: 0.9
"#,
                id
            )
        } else {
            "invalid: yaml: content:".to_string()
        };

        let file_path = prompts_dir.join(format!("{}.yml", id));
        fs::write(&file_path, content).unwrap();
        file_path
    }

    #[test]
    fn test_load_builtin_prompt() {
        let temp_dir = TempDir::new().unwrap();
        let prompt = load_prompt(temp_dir.path(), "answer.rag").unwrap();
        assert_eq!(prompt.id, "answer.rag");
    }

    #[test]
    fn test_workspace_override_wins() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "answer.rag", true);

        let prompt = load_prompt(temp_dir.path(), "answer.rag").unwrap();
        assert_eq!(prompt.title, "Custom Prompt");
        assert_eq!(prompt.template, "Custom: {{query}}");
        assert_eq!(prompt.generation.temperature, Some(0.9));
    }

    #[test]
    fn test_override_with_mismatched_id() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_prompt(temp_dir.path(), "answer.hybrid", true);
        fs::rename(&path, path.with_file_name("answer.knowledge.yml")).unwrap();

        assert!(load_prompt(temp_dir.path(), "answer.knowledge").is_err());
    }

    #[test]
    fn test_load_nonexistent_prompt() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_prompt(temp_dir.path(), "nonexistent").is_err());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "invalid", false);

        assert!(load_prompt(temp_dir.path(), "invalid").is_err());
    }

    #[test]
    fn test_list_prompts() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "custom.one", true);
        write_prompt(temp_dir.path(), "answer.rag", true);

        let prompts = list_prompts(temp_dir.path()).unwrap();
        assert_eq!(prompts.len(), 4);
        assert!(prompts.contains(&"custom.one".to_string()));
        assert!(prompts.contains(&"answer.knowledge".to_string()));
    }
}
