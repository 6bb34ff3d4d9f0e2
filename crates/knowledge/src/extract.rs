//! Text extraction from uploaded bytes.

use ragbridge_core::{AppError, AppResult};
use std::path::Path;

/// Converts document bytes into plain text.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    /// Fails with `UnsupportedFormat` or `CorruptDocument`.
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> AppResult<String>;
}

/// Content type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Markdown,
    Html,
    Csv,
    Json,
    PlainText,
}

impl ContentType {
    /// Classify a MIME type, ignoring parameters such as `charset`.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/plain" => Some(Self::PlainText),
            "text/markdown" | "text/x-markdown" => Some(Self::Markdown),
            "text/html" => Some(Self::Html),
            "text/csv" => Some(Self::Csv),
            "application/json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::PlainText => "text",
        }
    }
}

/// Guess a MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") | Some("text") | Some("log") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Extractor for UTF-8 text formats.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> AppResult<String> {
        let content_type = ContentType::from_mime(mime_type).ok_or_else(|| {
            AppError::UnsupportedFormat(format!("Cannot extract text from {}", mime_type))
        })?;

        let raw = std::str::from_utf8(bytes).map_err(|e| {
            AppError::CorruptDocument(format!("Document is not valid UTF-8: {}", e))
        })?;
        if raw.contains('\0') {
            return Err(AppError::CorruptDocument(
                "Document contains NUL bytes".to_string(),
            ));
        }

        let text = match content_type {
            ContentType::Html => clean_html(raw),
            ContentType::Json => {
                serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                    AppError::CorruptDocument(format!("Invalid JSON document: {}", e))
                })?;
                raw.to_string()
            }
            ContentType::Markdown | ContentType::Csv | ContentType::PlainText => raw.to_string(),
        };

        tracing::debug!(
            content_type = content_type.as_str(),
            bytes = bytes.len(),
            chars = text.chars().count(),
            "Extracted text"
        );
        Ok(text)
    }
}

/// Strip tags, scripts and styles from HTML.
fn clean_html(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    for (i, ch) in text.char_indices() {
        if ch == '<' {
            in_tag = true;
            let rest = lower.get(i..).unwrap_or_default();
            if rest.starts_with("<script") {
                in_script = true;
            } else if rest.starts_with("</script") {
                in_script = false;
            } else if rest.starts_with("<style") {
                in_style = true;
            } else if rest.starts_with("</style") {
                in_style = false;
            }
        } else if ch == '>' {
            in_tag = false;
            result.push(' ');
        } else if !in_tag && !in_script && !in_style {
            result.push(ch);
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
