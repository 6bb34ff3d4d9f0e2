//! On-disk snapshot of completed documents and their vectors.
//!
//! The local index is rebuilt from this file on start-up; in-flight jobs
//! are never persisted.

use crate::types::{Chunk, Document};
use chrono::{DateTime, Utc};
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Embedding model the vectors were produced with
    pub embedding_model: String,
    pub dimensions: usize,
    pub documents: Vec<SnapshotDocument>,
    /// chunk id -> vector
    pub vectors: BTreeMap<String, Vec<f32>>,
}

impl EngineSnapshot {
    pub fn new(embedding_model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            embedding_model: embedding_model.into(),
            dimensions,
            documents: Vec::new(),
            vectors: BTreeMap::new(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunks.len()).sum()
    }

    /// Write atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        tracing::debug!(
            path = %path.display(),
            documents = self.documents.len(),
            vectors = self.vectors.len(),
            "Saved index snapshot"
        );
        Ok(())
    }

    /// Read a snapshot; a missing file is not an error.
    pub fn load(path: &Path) -> AppResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content).map_err(|e| {
            AppError::Serialization(format!("Failed to parse snapshot {:?}: {}", path, e))
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::Config(format!(
                "Unsupported snapshot version {} in {:?} (expected {})",
                snapshot.version, path, SNAPSHOT_VERSION
            )));
        }

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use tempfile::TempDir;

    fn sample() -> EngineSnapshot {
        let mut snapshot = EngineSnapshot::new("trigram-v1", 2);
        snapshot.documents.push(SnapshotDocument {
            document: Document {
                file_id: "a".into(),
                name: "a.txt".into(),
                size_bytes: 5,
                mime_type: "text/plain".into(),
                uploaded_at: Utc::now(),
                status: JobStatus::Completed,
            },
            chunks: vec![Chunk::new("a", 0, "hello".into())],
        });
        snapshot
            .vectors
            .insert("file_a_chunk_0".into(), vec![0.6, 0.8]);
        snapshot
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".ragbridge").join("index.json");

        let snapshot = sample();
        snapshot.save(&path).unwrap();

        let loaded = EngineSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.chunk_count(), 1);
    }

    #[test]
    fn test_missing_snapshot() {
        let temp = TempDir::new().unwrap();
        assert!(EngineSnapshot::load(&temp.path().join("none.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_version_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        let mut snapshot = sample();
        snapshot.version = 99;
        snapshot.save(&path).unwrap();

        assert!(matches!(EngineSnapshot::load(&path), Err(AppError::Config(_))));
    }
}
