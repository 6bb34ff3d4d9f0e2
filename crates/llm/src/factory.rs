//! Generation client factory.

use crate::client::LlmClient;
use crate::providers::{ollama::DEFAULT_BASE_URL, MockClient, OllamaClient};
use crate::types::ProviderType;
use ragbridge_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create a generation client from a provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama", "mock")
/// * `endpoint` - Optional custom endpoint URL
/// * `timeout` - Per-request HTTP timeout
///
/// # Errors
/// Returns `AppError::Config` if the provider is unknown.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    timeout: Duration,
) -> AppResult<Arc<dyn LlmClient>> {
    match ProviderType::parse(provider) {
        Some(ProviderType::Ollama) => {
            let base_url = endpoint.unwrap_or(DEFAULT_BASE_URL);
            tracing::debug!(base_url, "Creating Ollama generation client");
            Ok(Arc::new(
                OllamaClient::with_base_url(base_url).with_timeout(timeout),
            ))
        }
        Some(ProviderType::Mock) => Ok(Arc::new(MockClient::new())),
        None => Err(AppError::Config(format!(
            "Unknown generation provider: {}",
            provider
        ))),
    }
}
