//! In-process exact nearest-neighbor index over chunk embeddings.
//!
//! Readers clone an `Arc` to the current snapshot and search it without
//! holding any lock, so a query observes either the state before an insert
//! or the state after it, never a half-written entry. Writers are
//! serialized and publish a new snapshot copy-on-write.

use crate::embeddings::Vector;
use crate::types::RankedHit;
use ragbridge_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// One indexed chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub file_id: String,
    pub vector: Vector,
}

impl IndexEntry {
    pub fn new(chunk_id: impl Into<String>, file_id: impl Into<String>, vector: Vector) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            file_id: file_id.into(),
            vector,
        }
    }
}

type Snapshot = Arc<HashMap<String, IndexEntry>>;

/// Local vector index, rebuildable from scratch.
#[derive(Debug, Default)]
pub struct LocalVectorIndex {
    snapshot: RwLock<Snapshot>,
    writer: Mutex<()>,
}

impl LocalVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn current(&self) -> Snapshot {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Insert every entry of one file atomically.
    ///
    /// The cancellation token is checked after the writer lock is taken, so
    /// a delete that cancelled the job before this point can never be
    /// followed by a late insert.
    pub async fn insert_file(
        &self,
        entries: Vec<IndexEntry>,
        cancel: &CancellationToken,
    ) -> AppResult<usize> {
        let _guard = self.writer.lock().await;

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled(
                "Local index insert discarded after cancellation".to_string(),
            ));
        }

        let count = entries.len();
        let mut next: HashMap<String, IndexEntry> = (*self.current().await).clone();
        for entry in entries {
            next.insert(entry.chunk_id.clone(), entry);
        }
        *self.snapshot.write().await = Arc::new(next);

        tracing::debug!(inserted = count, "Published local index snapshot");
        Ok(count)
    }

    /// Remove every entry belonging to `file_id`. Returns how many were removed.
    pub async fn remove_file(&self, file_id: &str) -> usize {
        let _guard = self.writer.lock().await;

        let current = self.current().await;
        let before = current.len();
        let next: HashMap<String, IndexEntry> = current
            .iter()
            .filter(|(_, entry)| entry.file_id != file_id)
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        let removed = before - next.len();

        if removed > 0 {
            *self.snapshot.write().await = Arc::new(next);
            tracing::debug!(file_id, removed, "Removed file from local index");
        }
        removed
    }

    /// Replace the whole index, used when rebuilding from a snapshot.
    pub async fn replace_all(&self, entries: Vec<IndexEntry>) {
        let _guard = self.writer.lock().await;
        let next: HashMap<String, IndexEntry> = entries
            .into_iter()
            .map(|entry| (entry.chunk_id.clone(), entry))
            .collect();
        *self.snapshot.write().await = Arc::new(next);
    }

    /// Top-k entries by cosine similarity, highest first, ties by chunk id.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Vec<RankedHit> {
        let snapshot = self.current().await;

        let mut hits: Vec<RankedHit> = snapshot
            .values()
            .map(|entry| RankedHit::new(entry.chunk_id.clone(), cosine_similarity(query, &entry.vector)))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        hits
    }

    pub async fn len(&self) -> usize {
        self.current().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All entries, sorted by chunk id.
    pub async fn entries(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.current().await.values().cloned().collect();
        entries.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        entries
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
