//! Test doubles and helpers shared by the engine scenarios.

use crate::blob::{BlobStore, DownloadHandle, LocalBlobStore};
use crate::cloud::{CloudVectorIndex, InMemoryCloudIndex};
use crate::config::{RagConfig, RetryConfig};
use crate::embeddings::EmbeddingProvider;
use crate::engine::{EngineServices, RagEngine};
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::jobs::ProcessingJob;
use crate::types::RankedHit;
use ragbridge_core::{AppError, AppResult};
use ragbridge_llm::{LlmClient, LlmRequest, LlmResponse, MockClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const QUESTION: &str = "Which document answers this?";

/// Unit vector whose cosine with the question vector is `similarity`.
pub fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

/// Two-dimensional embedder with scripted vectors.
///
/// The question embeds to `[1, 0]`, so a document's cosine similarity to it
/// is chosen by the test. Texts containing "slow" wait for a gate permit.
#[derive(Debug)]
pub struct ScriptedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    gate: Arc<Semaphore>,
}

impl ScriptedEmbedder {
    pub fn new(documents: &[(&str, f32)]) -> Self {
        let mut vectors: HashMap<String, Vec<f32>> = documents
            .iter()
            .map(|(text, similarity)| (text.to_string(), at_similarity(*similarity)))
            .collect();
        vectors.insert(QUESTION.to_string(), vec![1.0, 0.0]);
        Self {
            vectors,
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.gate)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-v1"
    }

    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.contains("slow") {
            let _permit = self.gate.acquire().await.unwrap();
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| at_similarity(0.0)))
    }
}

/// In-memory cloud index whose inserts and queries can be switched to
/// fail. Inserts optionally wait for a gate permit.
#[derive(Debug, Default)]
pub struct SwitchableCloud {
    pub inner: InMemoryCloudIndex,
    pub fail_inserts: AtomicBool,
    pub fail_queries: AtomicBool,
    pub insert_gate: Option<Arc<Semaphore>>,
}

#[async_trait::async_trait]
impl CloudVectorIndex for SwitchableCloud {
    fn name(&self) -> &str {
        "switchable"
    }

    async fn insert(&self, chunk_id: &str, vector: &[f32]) -> AppResult<()> {
        if let Some(gate) = &self.insert_gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("index unavailable".into()));
        }
        self.inner.insert(chunk_id, vector).await
    }

    async fn delete(&self, chunk_id: &str) -> AppResult<()> {
        self.inner.delete(chunk_id).await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AppError::Timeout("index query timed out".into()));
        }
        self.inner.query(vector, top_k).await
    }
}

/// Local blob store whose writes optionally wait for a gate permit.
#[derive(Debug)]
pub struct GatedBlobs {
    pub inner: LocalBlobStore,
    pub put_gate: Option<Arc<Semaphore>>,
    pub deletes: AtomicUsize,
}

#[async_trait::async_trait]
impl BlobStore for GatedBlobs {
    async fn put(&self, file_id: &str, bytes: &[u8]) -> AppResult<()> {
        if let Some(gate) = &self.put_gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.inner.put(file_id, bytes).await
    }

    async fn get(&self, file_id: &str) -> AppResult<Vec<u8>> {
        self.inner.get(file_id).await
    }

    async fn get_download_handle(&self, file_id: &str) -> AppResult<DownloadHandle> {
        self.inner.get_download_handle(file_id).await
    }

    async fn delete(&self, file_id: &str) -> AppResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(file_id).await
    }
}

/// Extractor that never finishes.
#[derive(Debug, Default)]
pub struct StuckExtractor;

#[async_trait::async_trait]
impl TextExtractor for StuckExtractor {
    async fn extract(&self, _bytes: &[u8], _mime_type: &str) -> AppResult<String> {
        std::future::pending().await
    }
}

/// Generation client that is always unavailable.
#[derive(Debug, Default)]
pub struct DownLlm;

#[async_trait::async_trait]
impl LlmClient for DownLlm {
    fn provider_name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: &LlmRequest) -> AppResult<LlmResponse> {
        Err(AppError::ServiceUnavailable("generation service down".into()))
    }
}

pub fn test_config() -> RagConfig {
    RagConfig {
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        ..RagConfig::default()
    }
}

/// Engine wired to test doubles, with handles to inspect them.
pub struct Harness {
    pub engine: RagEngine,
    pub cloud: Arc<SwitchableCloud>,
    /// Releases embeddings of texts containing "slow"
    pub gate: Arc<Semaphore>,
    /// Releases gated cloud inserts
    pub cloud_gate: Arc<Semaphore>,
    /// Releases gated blob writes
    pub blob_gate: Arc<Semaphore>,
    pub blobs: Arc<GatedBlobs>,
    pub workspace: TempDir,
}

pub struct HarnessBuilder {
    config: RagConfig,
    documents: Vec<(&'static str, f32)>,
    llm: Arc<dyn LlmClient>,
    extractor: Arc<dyn TextExtractor>,
    gate_cloud_inserts: bool,
    gate_blob_puts: bool,
    workspace: Option<TempDir>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            documents: Vec::new(),
            llm: Arc::new(MockClient::new()),
            extractor: Arc::new(PlainTextExtractor::new()),
            gate_cloud_inserts: false,
            gate_blob_puts: false,
            workspace: None,
        }
    }

    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = config;
        self
    }

    pub fn document(mut self, text: &'static str, similarity: f32) -> Self {
        self.documents.push((text, similarity));
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn gate_cloud_inserts(mut self) -> Self {
        self.gate_cloud_inserts = true;
        self
    }

    pub fn gate_blob_puts(mut self) -> Self {
        self.gate_blob_puts = true;
        self
    }

    pub fn workspace(mut self, workspace: TempDir) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn build(self) -> Harness {
        let workspace = self.workspace.unwrap_or_else(|| TempDir::new().unwrap());
        let embedder = ScriptedEmbedder::new(&self.documents);
        let gate = embedder.gate();
        let cloud_gate = Arc::new(Semaphore::new(0));
        let blob_gate = Arc::new(Semaphore::new(0));
        let cloud = Arc::new(SwitchableCloud {
            insert_gate: self.gate_cloud_inserts.then(|| Arc::clone(&cloud_gate)),
            ..SwitchableCloud::default()
        });
        let blobs = Arc::new(GatedBlobs {
            inner: LocalBlobStore::new(workspace.path().join("blobs"), Duration::from_secs(60)),
            put_gate: self.gate_blob_puts.then(|| Arc::clone(&blob_gate)),
            deletes: AtomicUsize::new(0),
        });

        let services = EngineServices {
            embedder: Arc::new(embedder),
            llm: self.llm,
            model: "test-model".to_string(),
            cloud: cloud.clone(),
            extractor: self.extractor,
            blobs: blobs.clone(),
            workspace: workspace.path().to_path_buf(),
        };

        Harness {
            engine: RagEngine::new(self.config, services).unwrap(),
            cloud,
            gate,
            cloud_gate,
            blob_gate,
            blobs,
            workspace,
        }
    }
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(engine: &RagEngine, job_id: &str) -> ProcessingJob {
    wait_until(engine, job_id, |job| job.status.is_terminal()).await
}

pub async fn wait_until<F>(engine: &RagEngine, job_id: &str, done: F) -> ProcessingJob
where
    F: Fn(&ProcessingJob) -> bool,
{
    for _ in 0..400 {
        let job = engine.get_job_status(job_id).await.unwrap();
        if done(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} did not reach the expected state", job_id);
}
