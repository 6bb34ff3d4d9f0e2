//! Answer synthesis via the generation service.
//!
//! Picks the prompt for the selected mode, fills in the question and the
//! retained fragments, and calls the generation client under the retry
//! budget.

use crate::config::RagConfig;
use crate::rag::types::AnswerMode;
use crate::retry::{retry_with_timeout, RetryPolicy};
use ragbridge_core::{AppError, AppResult};
use ragbridge_llm::{LlmClient, LlmRequest, LlmResponse};
use ragbridge_prompt::{build_prompt, load_prompt, BuiltPrompt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builds prompts and calls the generation service.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    workspace: PathBuf,
    policy: RetryPolicy,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        workspace: impl Into<PathBuf>,
        config: &RagConfig,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            workspace: workspace.into(),
            policy: RetryPolicy::from_config(&config.retry),
            timeout: config.timeouts.generation(),
            temperature: config.generation_temperature,
            max_tokens: config.generation_max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Render the prompt for `mode`. `fragments` are ignored in knowledge mode.
    pub fn build(&self, mode: AnswerMode, question: &str, fragments: &[String]) -> AppResult<BuiltPrompt> {
        let prompt_id = mode.prompt_id().ok_or_else(|| {
            AppError::InvalidInput(format!("No prompt for answer mode {}", mode))
        })?;
        let definition = load_prompt(&self.workspace, prompt_id)?;

        let mut variables = HashMap::new();
        variables.insert("query".to_string(), question.to_string());
        if mode != AnswerMode::Knowledge {
            variables.insert("context".to_string(), build_context(fragments));
        }

        build_prompt(&definition, variables)
    }

    /// Generate an answer. Errors are returned as-is for the caller to
    /// turn into an error envelope.
    #[tracing::instrument(skip(self, question, fragments), fields(mode = %mode, fragments = fragments.len()))]
    pub async fn synthesize(
        &self,
        mode: AnswerMode,
        question: &str,
        fragments: &[String],
    ) -> AppResult<LlmResponse> {
        let built = self.build(mode, question, fragments)?;

        let mut request = LlmRequest::new(built.user, self.model.clone())
            .with_temperature(built.generation.temperature.unwrap_or(self.temperature))
            .with_max_tokens(built.generation.max_tokens.unwrap_or(self.max_tokens));
        if let Some(system) = built.system {
            request = request.with_system(system);
        }

        tracing::debug!(
            provider = self.llm.provider_name(),
            prompt_len = request.prompt.len(),
            "Requesting answer"
        );

        let response = retry_with_timeout(&self.policy, self.timeout, "generate", || {
            self.llm.complete(&request)
        })
        .await?;

        if response.content.trim().is_empty() {
            return Err(AppError::Llm("Generation service returned an empty answer".to_string()));
        }
        Ok(response)
    }
}

/// Number the fragments and join them for the prompt.
pub fn build_context(fragments: &[String]) -> String {
    fragments
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[Document {}]\n{}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
