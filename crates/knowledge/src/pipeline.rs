//! Background ingestion worker.
//!
//! `pending -> uploading -> processing -> completed`, with `error`
//! reachable from both working states. The local index is written first,
//! then the cloud mirror; the job only completes after both. If the cloud
//! phase fails the local entries are rolled back and the document is
//! queued for repair.

use crate::chunker::{chunk_text, normalize_text};
use crate::engine::EngineInner;
use crate::jobs::JobStage;
use crate::retry::retry_with_timeout;
use crate::types::{Chunk, JobStatus};
use crate::vector_index::IndexEntry;
use futures::stream::{self, StreamExt};
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Work for one ingestion job.
#[derive(Debug)]
pub(crate) struct IngestTask {
    pub job_id: String,
    pub file_id: String,
    pub mime_type: String,
    /// `None` re-reads the original from the blob store.
    pub bytes: Option<Vec<u8>>,
    pub cancel: CancellationToken,
}

/// Follow-up work left behind by a partially failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairTask {
    /// The cloud phase failed; ingest the document again.
    Reingest { file_id: String },
    /// Cloud datapoints could not be removed.
    CloudDelete {
        file_id: String,
        chunk_ids: Vec<String>,
    },
}

impl RepairTask {
    pub fn file_id(&self) -> &str {
        match self {
            RepairTask::Reingest { file_id } | RepairTask::CloudDelete { file_id, .. } => file_id,
        }
    }
}

/// FIFO of pending repairs, without duplicates.
#[derive(Debug, Default)]
pub struct RepairQueue {
    tasks: Mutex<VecDeque<RepairTask>>,
}

impl RepairQueue {
    pub fn push(&self, task: RepairTask) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.contains(&task) {
            tracing::warn!(file_id = task.file_id(), task = ?task, "Queued repair");
            tasks.push_back(task);
        }
    }

    pub fn drain(&self) -> Vec<RepairTask> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn pending(&self) -> Vec<RepairTask> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Local,
    Cloud,
}

/// What has been written so far, for rollback.
#[derive(Debug)]
struct Attempt {
    phase: Phase,
    chunk_ids: Vec<String>,
}

fn ensure_live(cancel: &CancellationToken, what: &str) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled(format!("Ingestion cancelled before {}", what)))
    } else {
        Ok(())
    }
}

/// Drive one job to a terminal state.
#[tracing::instrument(skip(engine, task), fields(job_id = %task.job_id, file_id = %task.file_id))]
pub(crate) async fn run_ingestion(engine: &EngineInner, task: IngestTask) {
    let mut attempt = Attempt {
        phase: Phase::Prepare,
        chunk_ids: Vec::new(),
    };

    match ingest_document(engine, &task, &mut attempt).await {
        Ok(()) => {}
        Err(err) => handle_failure(engine, &task, attempt, err).await,
    }
}

async fn ingest_document(
    engine: &EngineInner,
    task: &IngestTask,
    attempt: &mut Attempt,
) -> AppResult<()> {
    let job_id = task.job_id.as_str();
    let file_id = task.file_id.as_str();
    let config = &engine.config;

    // Uploading: keep the original.
    engine
        .jobs
        .set_status(job_id, JobStatus::Uploading, JobStage::Storing)?;
    set_document_status(engine, file_id, JobStatus::Uploading).await?;

    let bytes = match &task.bytes {
        Some(bytes) => {
            retry_with_timeout(&engine.policy, config.timeouts.blob(), "blob_put", || {
                engine.blobs.put(file_id, bytes)
            })
            .await?;
            // A delete may have removed the blob while this write was in flight.
            ensure_live(&task.cancel, "processing")?;
            bytes.clone()
        }
        None => {
            retry_with_timeout(&engine.policy, config.timeouts.blob(), "blob_get", || {
                engine.blobs.get(file_id)
            })
            .await?
        }
    };
    engine.jobs.advance(job_id, 10, JobStage::Storing)?;

    // Processing: extract and chunk.
    engine
        .jobs
        .set_status(job_id, JobStatus::Processing, JobStage::Extracting)?;
    set_document_status(engine, file_id, JobStatus::Processing).await?;

    let text = tokio::time::timeout(
        config.timeouts.extraction(),
        engine.extractor.extract(&bytes, &task.mime_type),
    )
    .await
    .map_err(|_| {
        AppError::Timeout(format!(
            "Text extraction did not complete within {}ms",
            config.timeouts.extraction_ms
        ))
    })??;
    let normalized = normalize_text(&text);
    engine.jobs.advance(job_id, 20, JobStage::Chunking)?;

    let chunks: Vec<Chunk> = chunk_text(&normalized, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .map(|candidate| Chunk::new(file_id, candidate.ordinal, candidate.text))
        .collect();
    let total = chunks.len();

    ensure_live(&task.cancel, "chunk registration")?;
    if !engine.store.set_chunks(file_id, chunks.clone()).await {
        return Err(AppError::Cancelled(format!("Document {} was removed", file_id)));
    }
    engine.jobs.advance_with(job_id, 30, JobStage::Embedding, |job| {
        job.chunks_total = total;
    })?;

    if chunks.is_empty() {
        tracing::info!(file_id, "Document has no text, nothing to index");
        return finish(engine, task).await;
    }

    // Embedding, through the shared single-flight cache.
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let mut embedded = stream::iter(texts)
        .map(|text| async move { engine.cache.get_or_compute(&text).await })
        .buffered(config.embedding_concurrency.max(1));

    let mut entries = Vec::with_capacity(total);
    while let Some(vector) = embedded.next().await {
        let vector = vector?;
        ensure_live(&task.cancel, "storing embeddings")?;

        let chunk = &chunks[entries.len()];
        entries.push(IndexEntry::new(chunk.id.clone(), file_id, vector));

        let done = entries.len();
        let progress = 30 + (30 * done / total) as u8;
        engine
            .jobs
            .advance_with(job_id, progress, JobStage::Embedding, |job| {
                job.chunks_embedded = done;
            })?;
    }
    drop(embedded);

    attempt.chunk_ids = entries.iter().map(|e| e.chunk_id.clone()).collect();

    // Phase one: local index.
    attempt.phase = Phase::Local;
    engine.jobs.advance(job_id, 60, JobStage::Indexing)?;
    engine.local.insert_file(entries.clone(), &task.cancel).await?;
    engine.jobs.advance(job_id, 70, JobStage::Mirroring)?;

    // Phase two: cloud mirror.
    attempt.phase = Phase::Cloud;
    engine
        .cloud
        .upsert_entries(&entries, &task.cancel, |written| {
            let progress = 70 + (29 * written / total) as u8;
            // A terminal job is caught by the next cancellation check.
            let _ = engine.jobs.advance_with(job_id, progress, JobStage::Mirroring, |job| {
                job.chunks_indexed = written;
            });
        })
        .await?;

    finish(engine, task).await
}

async fn set_document_status(engine: &EngineInner, file_id: &str, status: JobStatus) -> AppResult<()> {
    if engine.store.set_status(file_id, status).await {
        Ok(())
    } else {
        Err(AppError::Cancelled(format!("Document {} was removed", file_id)))
    }
}

async fn finish(engine: &EngineInner, task: &IngestTask) -> AppResult<()> {
    engine.jobs.complete(&task.job_id)?;
    // A delete racing with completion removes the document; nothing to mark.
    engine
        .store
        .set_status(&task.file_id, JobStatus::Completed)
        .await;
    Ok(())
}

async fn handle_failure(engine: &EngineInner, task: &IngestTask, attempt: Attempt, err: AppError) {
    let file_id = task.file_id.as_str();
    let cancelled = matches!(err, AppError::Cancelled(_));

    // A newer job for the same document owns its index entries now.
    let superseded = engine
        .jobs
        .active_job_for(file_id)
        .is_some_and(|active| active != task.job_id);

    if attempt.phase != Phase::Prepare && !superseded {
        let removed = engine.local.remove_file(file_id).await;
        tracing::info!(file_id, removed, "Rolled back local index entries");

        if let Err(delete_err) = engine.cloud.delete_chunks(&attempt.chunk_ids).await {
            tracing::warn!(file_id, error = %delete_err, "Cloud rollback failed");
            engine.repairs.push(RepairTask::CloudDelete {
                file_id: file_id.to_string(),
                chunk_ids: attempt.chunk_ids.clone(),
            });
        }
    }

    if cancelled {
        tracing::info!(file_id, reason = %err, "Discarded cancelled ingestion");

        // The document was deleted; a blob write that raced the delete must not survive it.
        if !engine.store.contains(file_id).await {
            if let Err(blob_err) = retry_with_timeout(
                &engine.policy,
                engine.config.timeouts.blob(),
                "blob_delete",
                || engine.blobs.delete(file_id),
            )
            .await
            {
                tracing::warn!(file_id, error = %blob_err, "Failed to delete original of removed document");
            }
        }
    }

    engine.jobs.fail(&task.job_id, &err);

    if !superseded {
        let status = engine
            .jobs
            .get(&task.job_id)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Error);
        engine.store.set_status(file_id, status).await;
    }

    if attempt.phase == Phase::Cloud && !cancelled && !superseded {
        engine.repairs.push(RepairTask::Reingest {
            file_id: file_id.to_string(),
        });
    }
}
