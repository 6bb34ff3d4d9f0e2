//! Ragbridge Core Library
//!
//! Foundational utilities shared by every Ragbridge crate:
//! - Error handling (`AppError`, `AppResult`, `ErrorKind`)
//! - Logging infrastructure
//! - Configuration management

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AppConfig, EmbeddingSettings};
pub use error::{AppError, AppResult, ErrorKind};
