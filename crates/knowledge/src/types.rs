//! Domain types shared across the engine.

use chrono::{DateTime, Utc};
use ragbridge_core::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by Documents and their ProcessingJobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Cancelled is reported separately but callers treat it as a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable kind plus human-readable cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AppError> for ErrorInfo {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// An uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: JobStatus,
}

/// A contiguous fragment of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `file_{file_id}_chunk_{ordinal}`
    pub id: String,
    pub file_id: String,
    pub ordinal: u32,
    pub text: String,
    pub char_len: usize,
}

impl Chunk {
    pub fn new(file_id: &str, ordinal: u32, text: String) -> Self {
        Self {
            id: chunk_id(file_id, ordinal),
            file_id: file_id.to_string(),
            ordinal,
            char_len: text.chars().count(),
            text,
        }
    }
}

/// Build the stable identifier of a chunk.
pub fn chunk_id(file_id: &str, ordinal: u32) -> String {
    format!("file_{}_chunk_{}", file_id, ordinal)
}

/// One entry of a backend's ranked result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub chunk_id: String,
    pub score: f32,
}

impl RankedHit {
    pub fn new(chunk_id: impl Into<String>, score: f32) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// An upload submitted to the engine.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub name: String,
    /// Re-upload an existing document under its current id.
    pub file_id: Option<String>,
}

impl IngestRequest {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            name: name.into(),
            file_id: None,
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }
}
