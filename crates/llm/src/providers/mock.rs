//! Offline generation provider.
//!
//! Produces a deterministic answer built from the prompt, so the whole
//! pipeline can run without a model server.

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use ragbridge_core::AppResult;

/// Deterministic stand-in for a generation service.
#[derive(Debug, Default, Clone)]
pub struct MockClient;

impl MockClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let words = request.prompt.split_whitespace().count() as u32;
        let excerpt: String = request.prompt.chars().take(200).collect();

        Ok(LlmResponse {
            content: format!("[mock:{}] {}", request.model, excerpt.trim()),
            model: request.model.clone(),
            usage: LlmUsage::new(words, 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let client = MockClient::new();
        let request = LlmRequest::new("What is RRF?", "tiny");

        let first = client.complete(&request).await.unwrap();
        let second = client.complete(&request).await.unwrap();

        assert_eq!(first.content, second.content);
        assert!(first.content.contains("What is RRF?"));
        assert_eq!(first.usage.prompt_tokens, 3);
    }
}
