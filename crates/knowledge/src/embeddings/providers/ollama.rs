//! Ollama embedding provider.
//!
//! Calls `POST /api/embeddings` on a local Ollama runtime using models such
//! as `nomic-embed-text`. Retries are not done here; the embedding cache
//! wraps every call in the engine's retry policy.

use crate::embeddings::provider::EmbeddingProvider;
use async_trait::async_trait;
use ragbridge_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

/// Ollama embedding provider using the local API.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// Create a provider. No request is made until the first `embed`.
    ///
    /// The endpoint falls back to `OLLAMA_URL`, then to the local default.
    pub fn new(
        endpoint: Option<&str>,
        model: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Config(format!("Failed to create HTTP client for Ollama: {}", e))
        })?;

        let base_url = match endpoint {
            Some(url) => url.to_string(),
            None => std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
        })
    }

    fn check_dimensions(&self, embedding: &[f32]) -> AppResult<()> {
        if embedding.len() != self.dimensions {
            return Err(AppError::Config(format!(
                "Ollama model '{}' returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

fn classify_transport(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("Ollama embedding timed out: {}", err))
    } else if err.is_connect() {
        AppError::ServiceUnavailable(format!("Ollama is not reachable: {}", err))
    } else {
        AppError::Backend(format!("Failed to send request to Ollama: {}", err))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("Cannot embed empty text".to_string()));
        }

        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let detail = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);
            return Err(AppError::from_http_status("Ollama embeddings", status.as_u16(), &detail));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("Failed to parse Ollama response: {}", e)))?;

        self.check_dimensions(&body.embedding)?;
        debug!(dimensions = body.embedding.len(), "Generated embedding");

        Ok(body.embedding)
    }
}
