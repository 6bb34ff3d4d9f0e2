//! Embedding generation and caching.
//!
//! Providers turn text into vectors; the cache in front of them makes sure
//! identical text is embedded once, however many callers ask for it.

pub mod cache;
pub mod provider;
pub mod providers;

pub use cache::{cache_key, CacheStats, EmbeddingCache, Vector};
pub use provider::{create_provider, EmbeddingProvider};
