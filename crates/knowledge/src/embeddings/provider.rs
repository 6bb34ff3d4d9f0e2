//! Embedding provider trait and factory.

use ragbridge_core::{AppError, AppResult, EmbeddingSettings};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding services.
///
/// Implementations fail with `RateLimited` (retryable) or `InvalidInput`
/// (not retryable); transport problems map to `Backend`/`Timeout`.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Create an embedding provider from the application settings.
pub fn create_provider(
    settings: &EmbeddingSettings,
    timeout: Duration,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match settings.provider.as_str() {
        "mock" => Ok(Arc::new(super::providers::mock::MockProvider::new(
            settings.dimensions,
        ))),

        "ollama" => {
            let provider = super::providers::ollama::OllamaProvider::new(
                settings.endpoint.as_deref(),
                &settings.model,
                settings.dimensions,
                timeout,
            )?;
            Ok(Arc::new(provider))
        }

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: mock, ollama",
            settings.provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_provider() {
        let settings = EmbeddingSettings {
            dimensions: 128,
            ..EmbeddingSettings::default()
        };

        let provider = create_provider(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(provider.provider_name(), "mock");
        assert_eq!(provider.model_name(), "trigram-v1");
        assert_eq!(provider.dimensions(), 128);
    }

    #[test]
    fn test_create_ollama_provider_is_lazy() {
        let settings = EmbeddingSettings {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            endpoint: Some("http://127.0.0.1:9".to_string()),
        };

        let provider = create_provider(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }

    #[test]
    fn test_create_unknown_provider() {
        let settings = EmbeddingSettings {
            provider: "unknown".to_string(),
            ..EmbeddingSettings::default()
        };

        let err = create_provider(&settings, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[tokio::test]
    async fn test_default_batch_preserves_order() {
        let provider = create_provider(&EmbeddingSettings::default(), Duration::from_secs(1)).unwrap();
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];

        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], provider.embed("alpha beta").await.unwrap());
        assert_eq!(batch[1], provider.embed("gamma delta").await.unwrap());
    }
}
