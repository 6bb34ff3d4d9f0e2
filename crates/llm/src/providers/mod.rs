//! Generation provider implementations.

pub mod mock;
pub mod ollama;

pub use mock::MockClient;
pub use ollama::OllamaClient;
