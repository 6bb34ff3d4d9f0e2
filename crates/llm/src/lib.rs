//! Generation service integration for Ragbridge.
//!
//! Provider-agnostic abstraction over the language model that turns a
//! prompt into an answer.
//!
//! # Providers
//! - **Ollama**: Local LLM runtime (default)
//! - **Mock**: Deterministic offline responder
//!
//! # Example
//! ```no_run
//! use ragbridge_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::{MockClient, OllamaClient};
pub use types::ProviderType;
