//! Error types for Ragbridge.
//!
//! This module defines a unified error enum that covers every failure the
//! engine can surface: configuration, I/O, backend (embedding, generation,
//! cloud index) failures, content problems and lookup misses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for Ragbridge.
///
/// All functions in the workspace return `Result<T, AppError>`.
/// We never panic; errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A backend asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// An external call did not answer within its budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A backend is reachable but refusing work
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Transport-level or otherwise transient backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend rejected the input itself
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The generation service refused to produce content
    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    /// The text extractor does not handle this MIME type
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The document bytes could not be decoded
    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    /// Unknown file id or job id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation clashes with work already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Work was cancelled before it could finish
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Knowledge engine errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Machine-readable failure category attached to every surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientBackend,
    Configuration,
    Content,
    NotFound,
    Conflict,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientBackend => "transient_backend",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Content => "content",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Classify this error into the public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RateLimited(_)
            | AppError::Timeout(_)
            | AppError::ServiceUnavailable(_)
            | AppError::Backend(_) => ErrorKind::TransientBackend,
            AppError::Config(_) => ErrorKind::Configuration,
            AppError::InvalidInput(_)
            | AppError::ContentFiltered(_)
            | AppError::UnsupportedFormat(_)
            | AppError::CorruptDocument(_) => ErrorKind::Content,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Cancelled(_) => ErrorKind::Cancelled,
            AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Llm(_)
            | AppError::Knowledge(_)
            | AppError::Prompt(_)
            | AppError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited(_)
                | AppError::Timeout(_)
                | AppError::ServiceUnavailable(_)
                | AppError::Backend(_)
        )
    }

    /// Map a non-success HTTP status from an external service onto the taxonomy.
    pub fn from_http_status(service: &str, status: u16, body: &str) -> Self {
        let detail = format!("{} returned HTTP {}: {}", service, status, body.trim());
        match status {
            429 => AppError::RateLimited(detail),
            408 | 504 => AppError::Timeout(detail),
            502 | 503 => AppError::ServiceUnavailable(detail),
            400 | 413 | 422 => AppError::InvalidInput(detail),
            401 | 403 => AppError::Config(detail),
            404 => AppError::NotFound(detail),
            s if s >= 500 => AppError::Backend(detail),
            _ => AppError::Other(detail),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(AppError::RateLimited("slow down".into()).is_retryable());
        assert!(AppError::Timeout("embed".into()).is_retryable());
        assert!(AppError::ServiceUnavailable("503".into()).is_retryable());
        assert!(AppError::Backend("reset".into()).is_retryable());
        assert!(!AppError::InvalidInput("empty".into()).is_retryable());
        assert!(!AppError::ContentFiltered("blocked".into()).is_retryable());
        assert!(!AppError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            AppError::Timeout("x".into()).kind(),
            ErrorKind::TransientBackend
        );
        assert_eq!(AppError::Config("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(
            AppError::UnsupportedFormat("x".into()).kind(),
            ErrorKind::Content
        );
        assert_eq!(AppError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(AppError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(AppError::Cancelled("x".into()).kind(), ErrorKind::Cancelled);
        assert_eq!(AppError::Other("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_from_http_status() {
        assert!(matches!(
            AppError::from_http_status("embedder", 429, "busy"),
            AppError::RateLimited(_)
        ));
        assert!(matches!(
            AppError::from_http_status("embedder", 503, ""),
            AppError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            AppError::from_http_status("embedder", 400, "empty prompt"),
            AppError::InvalidInput(_)
        ));
        assert!(AppError::from_http_status("index", 500, "boom").is_retryable());
        assert!(!AppError::from_http_status("index", 401, "").is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TransientBackend).unwrap();
        assert_eq!(json, "\"transient_backend\"");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
