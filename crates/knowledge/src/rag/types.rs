//! Answer envelope types.

use crate::rag::mode::RetrievalMetrics;
use crate::types::ErrorInfo;
use serde::{Deserialize, Serialize};

/// Strategy used to produce an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Grounded in retrieved fragments, high confidence
    Rag,
    /// Retrieved fragments blended with general knowledge
    Hybrid,
    /// Nothing relevant retrieved; general knowledge only
    Knowledge,
    /// Generation failed
    Error,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Rag => "rag",
            AnswerMode::Hybrid => "hybrid",
            AnswerMode::Knowledge => "knowledge",
            AnswerMode::Error => "error",
        }
    }

    /// Prompt definition used for this mode.
    pub fn prompt_id(&self) -> Option<&'static str> {
        match self {
            AnswerMode::Rag => Some(ragbridge_prompt::ANSWER_RAG),
            AnswerMode::Hybrid => Some(ragbridge_prompt::ANSWER_HYBRID),
            AnswerMode::Knowledge => Some(ragbridge_prompt::ANSWER_KNOWLEDGE),
            AnswerMode::Error => None,
        }
    }
}

impl std::fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk cited as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedChunk {
    pub chunk_id: String,
    pub file_id: String,
    /// Display name of the owning document
    pub document_name: String,
    pub ordinal: u32,
    pub snippet: String,
    pub fused_score: f64,
    /// Best raw similarity across backends
    pub similarity: f32,
}

/// Wall-clock timings of one answer, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerTiming {
    pub embed_ms: u64,
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

/// Retrieval without generation: what an answer to the question would cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Mode an answer would be generated in
    pub mode: AnswerMode,
    /// Every fused candidate, ordered by fused score
    pub candidates: Vec<CitedChunk>,
    pub metrics: RetrievalMetrics,
    pub timing: AnswerTiming,
}

/// The response to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEnvelope {
    pub answer: String,
    pub mode: AnswerMode,
    pub confidence: f32,
    /// Ordered by fused score; empty in `knowledge` and `error` modes
    pub sources: Vec<CitedChunk>,
    pub metrics: RetrievalMetrics,
    pub timing: AnswerTiming,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AnswerEnvelope {
    pub fn is_error(&self) -> bool {
        self.mode == AnswerMode::Error
    }
}

/// Maximum snippet length for cited chunks.
pub const MAX_SNIPPET_LENGTH: usize = 150;

/// Truncate a snippet at a word boundary, counting characters.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let truncated: String = text.chars().take(max_chars).collect();
    match truncated.rfind(char::is_whitespace) {
        Some(last_space) if last_space > 0 => format!("{}...", &truncated[..last_space]),
        _ => format!("{}...", truncated),
    }
}
