//! Engine façade: ingestion, job polling, deletion and answering.

use crate::blob::{validate_file_id, BlobStore, DownloadHandle, LocalBlobStore};
use crate::cloud::{create_cloud_index, CloudSearchClient, CloudVectorIndex, InMemoryCloudIndex};
use crate::config::{get_blob_dir, get_snapshot_path, RagConfig};
use crate::embeddings::providers::mock::MockProvider;
use crate::embeddings::{create_provider, CacheStats, EmbeddingCache, EmbeddingProvider, Vector};
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::jobs::{JobTracker, ProcessingJob};
use crate::pipeline::{run_ingestion, IngestTask, RepairQueue, RepairTask};
use crate::rag::fusion::{fuse, FusionParams};
use crate::rag::mode::{confidence, select_mode, RetrievalMetrics};
use crate::rag::synthesis::AnswerSynthesizer;
use crate::rag::types::{
    truncate_snippet, AnswerEnvelope, AnswerMode, AnswerTiming, CitedChunk, SearchResult,
    MAX_SNIPPET_LENGTH,
};
use crate::retry::{retry_with_timeout, RetryPolicy};
use crate::snapshot::{EngineSnapshot, SnapshotDocument};
use crate::store::DocumentStore;
use crate::types::{Chunk, Document, ErrorInfo, IngestRequest, JobStatus, RankedHit};
use crate::vector_index::{IndexEntry, LocalVectorIndex};
use chrono::Utc;
use ragbridge_core::{AppConfig, AppError, AppResult};
use ragbridge_llm::{create_client, LlmClient, MockClient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// External collaborators the engine talks to.
pub struct EngineServices {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmClient>,
    /// Generation model name
    pub model: String,
    pub cloud: Arc<dyn CloudVectorIndex>,
    pub extractor: Arc<dyn TextExtractor>,
    pub blobs: Arc<dyn BlobStore>,
    pub workspace: PathBuf,
}

impl EngineServices {
    /// Fully local services: mock embeddings and generation, in-memory
    /// cloud index, blobs under the workspace.
    pub fn offline(workspace: impl Into<PathBuf>, config: &RagConfig) -> Self {
        let workspace = workspace.into();
        Self {
            embedder: Arc::new(MockProvider::new(384)),
            llm: Arc::new(MockClient::new()),
            model: "mock".to_string(),
            cloud: Arc::new(InMemoryCloudIndex::new()),
            extractor: Arc::new(PlainTextExtractor::new()),
            blobs: Arc::new(LocalBlobStore::new(
                get_blob_dir(&workspace),
                std::time::Duration::from_secs(config.download_ttl_secs),
            )),
            workspace,
        }
    }

    /// Services described by the application and engine configuration.
    pub fn from_app_config(app: &AppConfig, config: &RagConfig) -> AppResult<Self> {
        let embedder = create_provider(&app.embedding, config.timeouts.embedding())?;
        let llm = create_client(
            &app.provider,
            app.endpoint.as_deref(),
            config.timeouts.generation(),
        )?;
        let cloud = create_cloud_index(&config.cloud, config.timeouts.cloud_search())?;

        Ok(Self {
            embedder,
            llm,
            model: app.model.clone(),
            cloud,
            extractor: Arc::new(PlainTextExtractor::new()),
            blobs: Arc::new(LocalBlobStore::new(
                get_blob_dir(&app.workspace),
                std::time::Duration::from_secs(config.download_ttl_secs),
            )),
            workspace: app.workspace.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct EngineCounters {
    rag: AtomicU64,
    hybrid: AtomicU64,
    knowledge: AtomicU64,
    error: AtomicU64,
    local_failures: AtomicU64,
    cloud_failures: AtomicU64,
}

impl EngineCounters {
    fn record_mode(&self, mode: AnswerMode) {
        let counter = match mode {
            AnswerMode::Rag => &self.rag,
            AnswerMode::Hybrid => &self.hybrid,
            AnswerMode::Knowledge => &self.knowledge,
            AnswerMode::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared state behind every [`RagEngine`] clone and its workers.
pub(crate) struct EngineInner {
    pub(crate) config: RagConfig,
    pub(crate) workspace: PathBuf,
    pub(crate) store: DocumentStore,
    pub(crate) jobs: JobTracker,
    pub(crate) cache: EmbeddingCache,
    pub(crate) local: LocalVectorIndex,
    pub(crate) cloud: CloudSearchClient,
    pub(crate) extractor: Arc<dyn TextExtractor>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) repairs: RepairQueue,
    pub(crate) policy: RetryPolicy,
    synthesizer: AnswerSynthesizer,
    job_slots: Arc<Semaphore>,
    counters: EngineCounters,
}

/// Engine statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub documents_by_status: BTreeMap<String, usize>,
    pub jobs_by_status: BTreeMap<String, usize>,
    pub chunk_count: usize,
    pub local_index_entries: usize,
    pub cloud_backend: String,
    pub cache: CacheStats,
    pub answers_by_mode: BTreeMap<String, u64>,
    pub local_search_failures: u64,
    pub cloud_search_failures: u64,
    pub pending_repairs: Vec<RepairTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub documents: usize,
    pub chunks: usize,
    /// Documents skipped because vectors were missing
    pub skipped: usize,
    pub cloud_resynced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Job ids started for re-ingestion
    pub reingested: Vec<String>,
    pub cloud_deletes: usize,
    /// Tasks that failed again and were re-queued
    pub requeued: usize,
    /// Tasks dropped because their document is gone
    pub dropped: usize,
}

/// Hybrid retrieval and answer engine.
#[derive(Clone)]
pub struct RagEngine {
    inner: Arc<EngineInner>,
}

impl RagEngine {
    /// Build an engine. Invalid configuration is rejected here.
    pub fn new(config: RagConfig, services: EngineServices) -> AppResult<Self> {
        config.validate()?;

        let policy = RetryPolicy::from_config(&config.retry);
        let cache = EmbeddingCache::new(
            services.embedder,
            config.cache_capacity,
            policy,
            config.timeouts.embedding(),
        )?;
        let cloud = CloudSearchClient::from_config(services.cloud, &config);
        let synthesizer = AnswerSynthesizer::new(
            services.llm,
            services.model,
            services.workspace.clone(),
            &config,
        );

        tracing::info!(
            embedder = cache.provider().provider_name(),
            embedding_model = cache.provider().model_name(),
            cloud = cloud.backend_name(),
            generation_model = synthesizer.model(),
            "Engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                jobs: JobTracker::new(std::time::Duration::from_secs(config.stall_timeout_secs)),
                job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                workspace: services.workspace,
                store: DocumentStore::new(),
                local: LocalVectorIndex::new(),
                extractor: services.extractor,
                blobs: services.blobs,
                repairs: RepairQueue::default(),
                counters: EngineCounters::default(),
                cache,
                cloud,
                synthesizer,
                policy,
                config,
            }),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Accept an upload and start processing it in the background.
    ///
    /// Re-uploading a document whose job is still running fails with
    /// `Conflict`. A re-upload of a finished document replaces it.
    pub async fn ingest(&self, request: IngestRequest) -> AppResult<String> {
        let inner = &self.inner;
        let file_id = match request.file_id {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        validate_file_id(&file_id)?;
        if request.name.trim().is_empty() {
            return Err(AppError::InvalidInput("Document name must not be empty".to_string()));
        }

        let (job, cancel) = inner.jobs.create(&file_id)?;

        let stale = inner.store.chunk_ids(&file_id).await;
        if !stale.is_empty() {
            tracing::info!(file_id = %file_id, chunks = stale.len(), "Replacing previous version");
            remove_entries(inner, &file_id, stale).await;
        }

        inner
            .store
            .upsert(Document {
                file_id: file_id.clone(),
                name: request.name,
                size_bytes: request.bytes.len() as u64,
                mime_type: request.mime_type.clone(),
                uploaded_at: Utc::now(),
                status: JobStatus::Pending,
            })
            .await;

        self.spawn(IngestTask {
            job_id: job.job_id.clone(),
            file_id,
            mime_type: request.mime_type,
            bytes: Some(request.bytes),
            cancel,
        });

        Ok(job.job_id)
    }

    fn spawn(&self, task: IngestTask) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&inner.job_slots).acquire_owned().await else {
                return;
            };
            run_ingestion(&inner, task).await;
        });
    }

    /// Poll a job. A stalled job is reported as `error`.
    pub async fn get_job_status(&self, job_id: &str) -> AppResult<ProcessingJob> {
        let (job, stalled_now) = self.inner.jobs.poll(job_id)?;
        if stalled_now {
            self.inner
                .store
                .set_status(&job.file_id, JobStatus::Error)
                .await;
        }
        Ok(job)
    }

    /// Delete a document, cancelling any in-flight processing first.
    ///
    /// Fails with `NotFound` when the document is unknown, including on a
    /// second delete of the same id.
    pub async fn delete_document(&self, file_id: &str) -> AppResult<()> {
        let inner = &self.inner;

        // Cancel before touching the indexes so no late write can land.
        let cancelled = inner.jobs.cancel_file(file_id);
        let removed = inner.store.remove(file_id).await;

        let chunk_ids: Vec<String> = match (&removed, &cancelled) {
            (None, None) => {
                return Err(AppError::NotFound(format!("Document {}", file_id)));
            }
            (Some((_, chunks)), _) => chunks.iter().map(|c| c.id.clone()).collect(),
            (None, Some(_)) => Vec::new(),
        };

        remove_entries(inner, file_id, chunk_ids).await;

        if let Err(err) = retry_with_timeout(
            &inner.policy,
            inner.config.timeouts.blob(),
            "blob_delete",
            || inner.blobs.delete(file_id),
        )
        .await
        {
            tracing::warn!(file_id, error = %err, "Failed to delete original");
        }

        tracing::info!(
            file_id,
            cancelled_job = cancelled.map(|job| job.job_id).unwrap_or_default(),
            "Deleted document"
        );
        Ok(())
    }

    /// Embed the question, search both backends and fuse the results.
    async fn retrieve(&self, question: &str) -> AppResult<Retrieval> {
        let inner = &self.inner;
        let config = &inner.config;
        let started = Instant::now();

        let query_vector = inner.cache.get_or_compute(question).await?;
        let embed_ms = started.elapsed().as_millis() as u64;

        let retrieval_started = Instant::now();
        let top_k = config.candidates_per_backend;
        let (local, cloud) = tokio::join!(
            tokio::time::timeout(
                config.timeouts.local_search(),
                inner.local.search(&query_vector, top_k)
            ),
            inner.cloud.query(&query_vector, top_k),
        );

        let local = local.map_err(|_| {
            AppError::Timeout(format!(
                "Local search did not complete within {}ms",
                config.timeouts.local_search_ms
            ))
        });
        let results = combine_backends(local, cloud, &inner.counters)?;

        // Only chunks of completed documents may be cited.
        let ids: Vec<&str> = results
            .local
            .iter()
            .chain(results.cloud.iter())
            .map(|hit| hit.chunk_id.as_str())
            .collect();
        let resolved = inner.store.resolve_completed(&ids).await;
        let keep = |hits: Vec<RankedHit>| -> Vec<RankedHit> {
            hits.into_iter()
                .filter(|hit| resolved.contains_key(&hit.chunk_id))
                .collect()
        };
        let local = keep(results.local);
        let cloud = keep(results.cloud);

        let outcome = fuse(&local, &cloud, &FusionParams::from_config(config));
        let mut metrics = RetrievalMetrics::compute(
            &local,
            &cloud,
            &outcome,
            config.min_similarity,
            config.high_confidence_threshold,
        );
        metrics.local_failed = results.local_failed;
        metrics.cloud_failed = results.cloud_failed;

        let mode = select_mode(&metrics);
        tracing::info!(
            mode = %mode,
            local_hits = metrics.local_hits,
            cloud_hits = metrics.cloud_hits,
            metrics = %serde_json::to_string(&metrics).unwrap_or_default(),
            "Selected answer mode"
        );

        let mut candidates = Vec::new();
        let mut fragments = Vec::new();
        for candidate in &outcome.candidates {
            let Some(found) = resolved.get(&candidate.chunk_id) else {
                continue;
            };
            fragments.push(found.chunk.text.clone());
            candidates.push(CitedChunk {
                chunk_id: candidate.chunk_id.clone(),
                file_id: found.chunk.file_id.clone(),
                document_name: found.document_name.clone(),
                ordinal: found.chunk.ordinal,
                snippet: truncate_snippet(&found.chunk.text, MAX_SNIPPET_LENGTH),
                fused_score: candidate.fused_score,
                similarity: candidate.best_similarity,
            });
        }

        Ok(Retrieval {
            mode,
            candidates,
            fragments,
            metrics,
            embed_ms,
            retrieval_ms: retrieval_started.elapsed().as_millis() as u64,
        })
    }

    /// Retrieve and fuse candidates for a question without generating an answer.
    pub async fn search(&self, question: &str) -> AppResult<SearchResult> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput("Question must not be empty".to_string()));
        }

        let retrieval = self.retrieve(question).await?;
        Ok(SearchResult {
            mode: retrieval.mode,
            candidates: retrieval.candidates,
            metrics: retrieval.metrics,
            timing: AnswerTiming {
                embed_ms: retrieval.embed_ms,
                retrieval_ms: retrieval.retrieval_ms,
                generation_ms: 0,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Answer a question from the indexed documents.
    pub async fn answer(&self, question: &str) -> AppResult<AnswerEnvelope> {
        let inner = &self.inner;
        let config = &inner.config;
        let started = Instant::now();

        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput("Question must not be empty".to_string()));
        }

        let Retrieval {
            mode,
            mut candidates,
            mut fragments,
            metrics,
            embed_ms,
            retrieval_ms,
        } = self.retrieve(question).await?;

        if mode == AnswerMode::Knowledge {
            candidates.clear();
            fragments.clear();
        }

        let generation_started = Instant::now();
        let generated = inner.synthesizer.synthesize(mode, question, &fragments).await;
        let generation_ms = generation_started.elapsed().as_millis() as u64;

        let timing = AnswerTiming {
            embed_ms,
            retrieval_ms,
            generation_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };

        let envelope = match generated {
            Ok(response) => AnswerEnvelope {
                answer: response.content,
                mode,
                confidence: confidence(mode, &metrics, config.knowledge_confidence),
                sources: candidates,
                metrics,
                timing,
                error: None,
            },
            Err(err) => {
                tracing::error!(mode = %mode, error = %err, "Answer generation failed");
                AnswerEnvelope {
                    answer: String::new(),
                    mode: AnswerMode::Error,
                    confidence: confidence(AnswerMode::Error, &metrics, config.knowledge_confidence),
                    sources: Vec::new(),
                    metrics,
                    timing,
                    error: Some(ErrorInfo::from(&err)),
                }
            }
        };

        inner.counters.record_mode(envelope.mode);
        Ok(envelope)
    }

    pub async fn get_document(&self, file_id: &str) -> AppResult<Document> {
        self.inner
            .store
            .get(file_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Document {}", file_id)))
    }

    /// Chunks of a document, in order.
    pub async fn document_chunks(&self, file_id: &str) -> AppResult<Vec<Chunk>> {
        if !self.inner.store.contains(file_id).await {
            return Err(AppError::NotFound(format!("Document {}", file_id)));
        }
        Ok(self.inner.store.chunks(file_id).await)
    }

    pub async fn list_documents(&self) -> Vec<Document> {
        self.inner.store.list().await
    }

    /// Time-limited link to the original upload.
    pub async fn download_handle(&self, file_id: &str) -> AppResult<DownloadHandle> {
        if !self.inner.store.contains(file_id).await {
            return Err(AppError::NotFound(format!("Document {}", file_id)));
        }
        self.inner.blobs.get_download_handle(file_id).await
    }

    pub async fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let counters = &inner.counters;

        let documents_by_status = inner
            .store
            .count_by_status()
            .await
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();
        let jobs_by_status = inner
            .jobs
            .counts_by_status()
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();

        let answers_by_mode = [
            (AnswerMode::Rag, &counters.rag),
            (AnswerMode::Hybrid, &counters.hybrid),
            (AnswerMode::Knowledge, &counters.knowledge),
            (AnswerMode::Error, &counters.error),
        ]
        .into_iter()
        .map(|(mode, counter)| (mode.as_str().to_string(), counter.load(Ordering::Relaxed)))
        .collect();

        EngineStats {
            documents_by_status,
            jobs_by_status,
            chunk_count: inner.store.chunk_count().await,
            local_index_entries: inner.local.len().await,
            cloud_backend: inner.cloud.backend_name().to_string(),
            cache: inner.cache.stats(),
            answers_by_mode,
            local_search_failures: counters.local_failures.load(Ordering::Relaxed),
            cloud_search_failures: counters.cloud_failures.load(Ordering::Relaxed),
            pending_repairs: inner.repairs.pending(),
        }
    }

    /// Persist completed documents and their vectors. Returns the path.
    pub async fn snapshot(&self) -> AppResult<PathBuf> {
        let inner = &self.inner;
        let provider = inner.cache.provider();
        let mut snapshot = EngineSnapshot::new(provider.model_name(), provider.dimensions());

        let entries: HashMap<String, Vector> = inner
            .local
            .entries()
            .await
            .into_iter()
            .map(|entry| (entry.chunk_id, entry.vector))
            .collect();
        for (document, chunks) in inner.store.completed().await {
            for chunk in &chunks {
                if let Some(vector) = entries.get(&chunk.id) {
                    snapshot.vectors.insert(chunk.id.clone(), vector.to_vec());
                }
            }
            snapshot.documents.push(SnapshotDocument { document, chunks });
        }

        let path = get_snapshot_path(&inner.workspace);
        snapshot.save(&path)?;
        tracing::info!(
            path = %path.display(),
            documents = snapshot.documents.len(),
            chunks = snapshot.chunk_count(),
            "Snapshot written"
        );
        Ok(path)
    }

    /// Rebuild the local index from the snapshot on disk, optionally
    /// mirroring it into the cloud index again.
    pub async fn restore(&self, resync_cloud: bool) -> AppResult<RestoreReport> {
        let inner = &self.inner;
        let path = get_snapshot_path(&inner.workspace);
        let Some(snapshot) = EngineSnapshot::load(&path)? else {
            tracing::debug!("No snapshot to restore");
            return Ok(RestoreReport::default());
        };

        let provider = inner.cache.provider();
        if snapshot.embedding_model != provider.model_name()
            || snapshot.dimensions != provider.dimensions()
        {
            return Err(AppError::Config(format!(
                "Snapshot was built with {} ({} dims) but the engine uses {} ({} dims); re-ingest the documents",
                snapshot.embedding_model,
                snapshot.dimensions,
                provider.model_name(),
                provider.dimensions()
            )));
        }

        let mut report = RestoreReport::default();
        let mut entries = Vec::new();

        for SnapshotDocument { mut document, chunks } in snapshot.documents {
            let vectors: Option<Vec<Vector>> = chunks
                .iter()
                .map(|chunk| snapshot.vectors.get(&chunk.id).map(|v| Vector::from(v.as_slice())))
                .collect();
            let Some(vectors) = vectors else {
                tracing::warn!(file_id = %document.file_id, "Snapshot is missing vectors, skipping document");
                report.skipped += 1;
                continue;
            };

            for (chunk, vector) in chunks.iter().zip(vectors) {
                inner.cache.insert(&chunk.text, Arc::clone(&vector));
                entries.push(IndexEntry::new(chunk.id.clone(), document.file_id.clone(), vector));
            }

            report.documents += 1;
            report.chunks += chunks.len();
            document.status = JobStatus::Completed;
            inner.store.restore(document, chunks).await;
        }

        inner.local.replace_all(entries.clone()).await;

        if resync_cloud {
            inner
                .cloud
                .upsert_entries(&entries, &CancellationToken::new(), |_| {})
                .await?;
            report.cloud_resynced = true;
        }

        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped,
            "Restored from snapshot"
        );
        Ok(report)
    }

    /// Work through the repair queue once.
    pub async fn run_repairs(&self) -> AppResult<RepairReport> {
        let inner = &self.inner;
        let mut report = RepairReport::default();

        for task in inner.repairs.drain() {
            match task {
                RepairTask::Reingest { file_id } => {
                    let Some(document) = inner.store.get(&file_id).await else {
                        report.dropped += 1;
                        continue;
                    };
                    match inner.jobs.create(&file_id) {
                        Ok((job, cancel)) => {
                            inner.store.set_status(&file_id, JobStatus::Pending).await;
                            self.spawn(IngestTask {
                                job_id: job.job_id.clone(),
                                file_id,
                                mime_type: document.mime_type,
                                bytes: None,
                                cancel,
                            });
                            report.reingested.push(job.job_id);
                        }
                        // Someone re-uploaded it meanwhile.
                        Err(AppError::Conflict(_)) => report.dropped += 1,
                        Err(err) => return Err(err),
                    }
                }
                RepairTask::CloudDelete { file_id, chunk_ids } => {
                    match inner.cloud.delete_chunks(&chunk_ids).await {
                        Ok(_) => report.cloud_deletes += 1,
                        Err(err) => {
                            tracing::warn!(file_id = %file_id, error = %err, "Cloud delete repair failed");
                            inner.repairs.push(RepairTask::CloudDelete { file_id, chunk_ids });
                            report.requeued += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    pub fn pending_repairs(&self) -> Vec<RepairTask> {
        self.inner.repairs.pending()
    }
}

/// Fused retrieval for one question.
struct Retrieval {
    mode: AnswerMode,
    candidates: Vec<CitedChunk>,
    /// Chunk texts, parallel to `candidates`
    fragments: Vec<String>,
    metrics: RetrievalMetrics,
    embed_ms: u64,
    retrieval_ms: u64,
}

#[derive(Debug)]
struct BackendResults {
    local: Vec<RankedHit>,
    cloud: Vec<RankedHit>,
    local_failed: bool,
    cloud_failed: bool,
}

/// One failed backend degrades to the other's results; both failing is an error.
fn combine_backends(
    local: AppResult<Vec<RankedHit>>,
    cloud: AppResult<Vec<RankedHit>>,
    counters: &EngineCounters,
) -> AppResult<BackendResults> {
    match (local, cloud) {
        (Err(local_err), Err(cloud_err)) => {
            counters.local_failures.fetch_add(1, Ordering::Relaxed);
            counters.cloud_failures.fetch_add(1, Ordering::Relaxed);
            Err(AppError::Backend(format!(
                "Both retrieval backends failed (local: {}; cloud: {})",
                local_err, cloud_err
            )))
        }
        (Ok(local), Ok(cloud)) => Ok(BackendResults {
            local,
            cloud,
            local_failed: false,
            cloud_failed: false,
        }),
        (Ok(local), Err(err)) => {
            tracing::warn!(error = %err, "Cloud search failed, fusing local results only");
            counters.cloud_failures.fetch_add(1, Ordering::Relaxed);
            Ok(BackendResults {
                local,
                cloud: Vec::new(),
                local_failed: false,
                cloud_failed: true,
            })
        }
        (Err(err), Ok(cloud)) => {
            tracing::warn!(error = %err, "Local search failed, fusing cloud results only");
            counters.local_failures.fetch_add(1, Ordering::Relaxed);
            Ok(BackendResults {
                local: Vec::new(),
                cloud,
                local_failed: true,
                cloud_failed: false,
            })
        }
    }
}

/// Remove a document's entries from both indexes. A cloud failure is
/// queued for repair instead of failing the caller.
async fn remove_entries(inner: &EngineInner, file_id: &str, chunk_ids: Vec<String>) {
    let removed = inner.local.remove_file(file_id).await;

    let unique: Vec<String> = chunk_ids
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    match inner.cloud.delete_chunks(&unique).await {
        Ok(cloud_removed) => {
            tracing::debug!(file_id, local = removed, cloud = cloud_removed, "Removed index entries");
        }
        Err(err) => {
            tracing::warn!(file_id, error = %err, "Cloud delete failed, queued for repair");
            inner.repairs.push(RepairTask::CloudDelete {
                file_id: file_id.to_string(),
                chunk_ids: unique,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn wait_for(engine: &RagEngine, job_id: &str) -> ProcessingJob {
        for _ in 0..400 {
            let job = engine.get_job_status(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", job_id);
    }

    fn hits(ids: &[&str]) -> Vec<RankedHit> {
        ids.iter().map(|id| RankedHit::new(*id, 0.9)).collect()
    }

    #[test]
    fn test_both_backends_failing_is_a_backend_error() {
        let counters = EngineCounters::default();
        let result = combine_backends(
            Err(AppError::Timeout("local".into())),
            Err(AppError::ServiceUnavailable("cloud".into())),
            &counters,
        );

        assert!(matches!(result, Err(AppError::Backend(_))));
        assert_eq!(counters.local_failures.load(Ordering::Relaxed), 1);
        assert_eq!(counters.cloud_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_one_failed_backend_degrades_to_the_other() {
        let counters = EngineCounters::default();

        let local_only = combine_backends(
            Ok(hits(&["a"])),
            Err(AppError::Timeout("cloud".into())),
            &counters,
        )
        .unwrap();
        assert_eq!(local_only.local.len(), 1);
        assert!(local_only.cloud.is_empty());
        assert!(local_only.cloud_failed && !local_only.local_failed);

        let cloud_only = combine_backends(
            Err(AppError::Timeout("local".into())),
            Ok(hits(&["b", "c"])),
            &counters,
        )
        .unwrap();
        assert_eq!(cloud_only.cloud.len(), 2);
        assert!(cloud_only.local_failed && !cloud_only.cloud_failed);

        assert_eq!(counters.local_failures.load(Ordering::Relaxed), 1);
        assert_eq!(counters.cloud_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config = RagConfig {
            local_weight: 0.9,
            ..RagConfig::default()
        };
        let services = EngineServices::offline(temp.path(), &config);
        assert!(matches!(
            RagEngine::new(config, services),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_engine_answers_from_its_documents() {
        let temp = TempDir::new().unwrap();
        let config = RagConfig::default();
        let engine = RagEngine::new(config.clone(), EngineServices::offline(temp.path(), &config)).unwrap();

        let text = "Reciprocal rank fusion merges ranked lists from several retrieval backends.";
        let job_id = engine
            .ingest(IngestRequest::new(text.as_bytes().to_vec(), "text/plain", "fusion.txt"))
            .await
            .unwrap();
        assert_eq!(wait_for(&engine, &job_id).await.status, JobStatus::Completed);

        let envelope = engine.answer(text).await.unwrap();
        assert_eq!(envelope.mode, AnswerMode::Rag);
        assert_eq!(envelope.sources.len(), 1);
        assert!(envelope.answer.starts_with("[mock:mock]"));

        let stats = engine.stats().await;
        assert_eq!(stats.cloud_backend, "memory");
        assert_eq!(stats.local_index_entries, 1);
        // The identical question text was already embedded during ingestion.
        assert_eq!(stats.cache.computations, 1);
    }
}
