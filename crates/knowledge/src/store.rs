//! Registry of documents and their chunks.

use crate::types::{Chunk, Document, JobStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    chunks: Vec<Chunk>,
}

/// Chunk text and owner needed to cite a retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChunk {
    pub chunk: Chunk,
    pub document_name: String,
}

/// Documents keyed by file id. Chunks are owned by their document and
/// disappear with it.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document, dropping any previous chunks.
    pub async fn upsert(&self, document: Document) {
        self.documents.write().await.insert(
            document.file_id.clone(),
            StoredDocument {
                document,
                chunks: Vec::new(),
            },
        );
    }

    /// Restore a document together with its chunks.
    pub async fn restore(&self, document: Document, chunks: Vec<Chunk>) {
        self.documents
            .write()
            .await
            .insert(document.file_id.clone(), StoredDocument { document, chunks });
    }

    pub async fn get(&self, file_id: &str) -> Option<Document> {
        self.documents
            .read()
            .await
            .get(file_id)
            .map(|stored| stored.document.clone())
    }

    pub async fn contains(&self, file_id: &str) -> bool {
        self.documents.read().await.contains_key(file_id)
    }

    /// Sorted by upload time, then id.
    pub async fn list(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .map(|stored| stored.document.clone())
            .collect();
        documents.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        documents
    }

    /// Returns false when the document no longer exists.
    pub async fn set_status(&self, file_id: &str, status: JobStatus) -> bool {
        match self.documents.write().await.get_mut(file_id) {
            Some(stored) => {
                stored.document.status = status;
                true
            }
            None => false,
        }
    }

    /// Returns false when the document no longer exists.
    pub async fn set_chunks(&self, file_id: &str, chunks: Vec<Chunk>) -> bool {
        match self.documents.write().await.get_mut(file_id) {
            Some(stored) => {
                stored.chunks = chunks;
                true
            }
            None => false,
        }
    }

    pub async fn chunks(&self, file_id: &str) -> Vec<Chunk> {
        self.documents
            .read()
            .await
            .get(file_id)
            .map(|stored| stored.chunks.clone())
            .unwrap_or_default()
    }

    pub async fn chunk_ids(&self, file_id: &str) -> Vec<String> {
        self.documents
            .read()
            .await
            .get(file_id)
            .map(|stored| stored.chunks.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn remove(&self, file_id: &str) -> Option<(Document, Vec<Chunk>)> {
        self.documents
            .write()
            .await
            .remove(file_id)
            .map(|stored| (stored.document, stored.chunks))
    }

    /// Look up chunks by id, keeping only those of completed documents.
    pub async fn resolve_completed(&self, chunk_ids: &[&str]) -> HashMap<String, ResolvedChunk> {
        let documents = self.documents.read().await;
        let mut out = HashMap::new();

        for stored in documents.values() {
            if stored.document.status != JobStatus::Completed {
                continue;
            }
            for chunk in &stored.chunks {
                if chunk_ids.contains(&chunk.id.as_str()) {
                    out.insert(
                        chunk.id.clone(),
                        ResolvedChunk {
                            chunk: chunk.clone(),
                            document_name: stored.document.name.clone(),
                        },
                    );
                }
            }
        }
        out
    }

    /// Completed documents with their chunks, for snapshots.
    pub async fn completed(&self) -> Vec<(Document, Vec<Chunk>)> {
        let mut out: Vec<(Document, Vec<Chunk>)> = self
            .documents
            .read()
            .await
            .values()
            .filter(|stored| stored.document.status == JobStatus::Completed)
            .map(|stored| (stored.document.clone(), stored.chunks.clone()))
            .collect();
        out.sort_by(|a, b| a.0.file_id.cmp(&b.0.file_id));
        out
    }

    pub async fn count_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for stored in self.documents.read().await.values() {
            *counts.entry(stored.document.status).or_insert(0) += 1;
        }
        counts
    }

    pub async fn chunk_count(&self) -> usize {
        self.documents
            .read()
            .await
            .values()
            .map(|stored| stored.chunks.len())
            .sum()
    }
}
