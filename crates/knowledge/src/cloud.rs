//! Client for the managed, externally hosted vector index.
//!
//! The cloud index is an eventual mirror of the local index. Adapters
//! implement [`CloudVectorIndex`]; [`CloudSearchClient`] adds retries,
//! per-call timeouts and write serialization on top of any adapter.

use crate::config::{CloudIndexConfig, RagConfig};
use crate::embeddings::Vector;
use crate::retry::{retry_with_timeout, RetryPolicy};
use crate::types::RankedHit;
use crate::vector_index::{cosine_similarity, IndexEntry};
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Operations exposed by a cloud vector search service.
#[async_trait::async_trait]
pub trait CloudVectorIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn insert(&self, chunk_id: &str, vector: &[f32]) -> AppResult<()>;

    async fn delete(&self, chunk_id: &str) -> AppResult<()>;

    /// Ranked `(chunk_id, score)` pairs, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>>;
}

/// Process-local stand-in for the managed index.
#[derive(Debug, Default)]
pub struct InMemoryCloudIndex {
    entries: RwLock<HashMap<String, Vector>>,
}

impl InMemoryCloudIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        self.entries.read().await.contains_key(chunk_id)
    }
}

#[async_trait::async_trait]
impl CloudVectorIndex for InMemoryCloudIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, chunk_id: &str, vector: &[f32]) -> AppResult<()> {
        self.entries
            .write()
            .await
            .insert(chunk_id.to_string(), Vector::from(vector.to_vec()));
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> AppResult<()> {
        match self.entries.write().await.remove(chunk_id) {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("Cloud datapoint {}", chunk_id))),
        }
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<RankedHit> = entries
            .iter()
            .map(|(id, stored)| RankedHit::new(id.clone(), cosine_similarity(vector, stored)))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Datapoint<'a> {
    datapoint_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_vector: Option<&'a [f32]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpsertRequest<'a> {
    datapoints: Vec<Datapoint<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveRequest<'a> {
    datapoint_ids: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NeighborQuery<'a> {
    datapoint: Datapoint<'a>,
    neighbor_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsRequest<'a> {
    queries: Vec<NeighborQuery<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsResponse {
    #[serde(default)]
    nearest_neighbors: Vec<NeighborList>,
}

#[derive(Debug, Deserialize)]
struct NeighborList {
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

#[derive(Debug, Deserialize)]
struct Neighbor {
    datapoint: NeighborDatapoint,
    #[serde(default)]
    distance: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborDatapoint {
    datapoint_id: String,
}

/// REST adapter for a Vertex-style vector search endpoint.
///
/// The index is expected to use a dot-product/cosine metric over unit
/// vectors, so the returned `distance` is used directly as similarity.
pub struct HttpCloudIndex {
    base_url: String,
    index_id: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpCloudIndex {
    pub fn new(
        endpoint: &str,
        index_id: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build cloud index client: {}", e)))?;

        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            index_id: index_id.to_string(),
            token,
            client,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1/{}:{}", self.base_url, self.index_id, method)
    }

    async fn post<B: Serialize>(&self, method: &str, body: &B) -> AppResult<reqwest::Response> {
        let mut request = self.client.post(self.url(method)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::from_http_status("Cloud index", status.as_u16(), &body));
        }
        Ok(response)
    }
}

fn classify_transport(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("Cloud index request timed out: {}", err))
    } else if err.is_connect() {
        AppError::ServiceUnavailable(format!("Cloud index is not reachable: {}", err))
    } else {
        AppError::Backend(format!("Cloud index request failed: {}", err))
    }
}

#[async_trait::async_trait]
impl CloudVectorIndex for HttpCloudIndex {
    fn name(&self) -> &str {
        "http"
    }

    async fn insert(&self, chunk_id: &str, vector: &[f32]) -> AppResult<()> {
        let body = UpsertRequest {
            datapoints: vec![Datapoint {
                datapoint_id: chunk_id,
                feature_vector: Some(vector),
            }],
        };
        self.post("upsertDatapoints", &body).await?;
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> AppResult<()> {
        let body = RemoveRequest {
            datapoint_ids: vec![chunk_id],
        };
        self.post("removeDatapoints", &body).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>> {
        let body = FindNeighborsRequest {
            queries: vec![NeighborQuery {
                datapoint: Datapoint {
                    datapoint_id: "query",
                    feature_vector: Some(vector),
                },
                neighbor_count: top_k,
            }],
        };

        let response: FindNeighborsResponse = self
            .post("findNeighbors", &body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("Failed to parse cloud index response: {}", e)))?;

        Ok(response
            .nearest_neighbors
            .into_iter()
            .next()
            .map(|list| {
                list.neighbors
                    .into_iter()
                    .map(|n| RankedHit::new(n.datapoint.datapoint_id, n.distance))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Build the cloud adapter named in the configuration.
pub fn create_cloud_index(
    config: &CloudIndexConfig,
    timeout: Duration,
) -> AppResult<Arc<dyn CloudVectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryCloudIndex::new())),
        "http" => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                AppError::Config("cloud.endpoint is required for the http provider".to_string())
            })?;
            let index_id = config.index_id.as_deref().ok_or_else(|| {
                AppError::Config("cloud.index_id is required for the http provider".to_string())
            })?;
            let token = std::env::var(&config.token_env).ok();
            if token.is_none() {
                tracing::warn!(env = %config.token_env, "No cloud index token set, sending unauthenticated requests");
            }
            Ok(Arc::new(HttpCloudIndex::new(endpoint, index_id, token, timeout)?))
        }
        other => Err(AppError::Config(format!(
            "Unknown cloud index provider: {}",
            other
        ))),
    }
}

/// Retrying, write-serialized front for a [`CloudVectorIndex`].
pub struct CloudSearchClient {
    index: Arc<dyn CloudVectorIndex>,
    write_lock: Mutex<()>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl CloudSearchClient {
    pub fn new(index: Arc<dyn CloudVectorIndex>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            index,
            write_lock: Mutex::new(()),
            policy,
            timeout,
        }
    }

    pub fn from_config(index: Arc<dyn CloudVectorIndex>, config: &RagConfig) -> Self {
        Self::new(
            index,
            RetryPolicy::from_config(&config.retry),
            config.timeouts.cloud_search(),
        )
    }

    pub fn backend_name(&self) -> &str {
        self.index.name()
    }

    /// Mirror entries into the cloud index, one datapoint at a time.
    ///
    /// Cancellation is checked under the write lock before every insert,
    /// so nothing is written once a delete has cancelled the job.
    /// `on_progress` receives the number of entries written so far.
    pub async fn upsert_entries<F>(
        &self,
        entries: &[IndexEntry],
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> AppResult<usize>
    where
        F: FnMut(usize),
    {
        for (i, entry) in entries.iter().enumerate() {
            let guard = self.write_lock.lock().await;
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!(
                    "Cloud upsert stopped after {} of {} entries",
                    i,
                    entries.len()
                )));
            }

            retry_with_timeout(&self.policy, self.timeout, "cloud_insert", || {
                self.index.insert(&entry.chunk_id, &entry.vector)
            })
            .await?;
            drop(guard);

            on_progress(i + 1);
        }
        Ok(entries.len())
    }

    /// Delete datapoints; ids already missing in the cloud are skipped.
    pub async fn delete_chunks(&self, chunk_ids: &[String]) -> AppResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;

        for chunk_id in chunk_ids {
            let result = retry_with_timeout(&self.policy, self.timeout, "cloud_delete", || {
                self.index.delete(chunk_id)
            })
            .await;

            match result {
                Ok(()) => removed += 1,
                Err(AppError::NotFound(_)) => {
                    tracing::debug!(chunk_id = %chunk_id, "Cloud datapoint already absent");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Nearest neighbors from the cloud index.
    #[tracing::instrument(skip(self, vector), fields(backend = %self.index.name()))]
    pub async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>> {
        retry_with_timeout(&self.policy, self.timeout, "cloud_query", || {
            self.index.query(vector, top_k)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn entry(id: &str, v: &[f32]) -> IndexEntry {
        IndexEntry::new(id, "f1", Vector::from(v.to_vec()))
    }

    /// Fails the first `failures` inserts with a rate limit.
    #[derive(Default)]
    struct FlakyIndex {
        inner: InMemoryCloudIndex,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CloudVectorIndex for FlakyIndex {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn insert(&self, chunk_id: &str, vector: &[f32]) -> AppResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::RateLimited("slow down".into()));
            }
            self.inner.insert(chunk_id, vector).await
        }

        async fn delete(&self, chunk_id: &str) -> AppResult<()> {
            self.inner.delete(chunk_id).await
        }

        async fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<RankedHit>> {
            self.inner.query(vector, top_k).await
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_memory_index_query_order() {
        let index = InMemoryCloudIndex::new();
        index.insert("a", &[1.0, 0.0]).await.unwrap();
        index.insert("b", &[0.0, 1.0]).await.unwrap();

        let hits = index.query(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn test_upsert_retries_rate_limits() {
        let index = Arc::new(FlakyIndex {
            failures: 2,
            ..FlakyIndex::default()
        });
        let client = CloudSearchClient::new(index.clone(), fast_policy(), Duration::from_secs(1));

        let mut progress = Vec::new();
        let written = client
            .upsert_entries(
                &[entry("a", &[1.0]), entry("b", &[1.0])],
                &CancellationToken::new(),
                |n| progress.push(n),
            )
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(progress, vec![1, 2]);
        assert!(index.inner.contains("a").await);
        assert!(index.inner.contains("b").await);
    }

    #[tokio::test]
    async fn test_upsert_stops_on_cancel() {
        let index = Arc::new(InMemoryCloudIndex::new());
        let client = CloudSearchClient::new(index.clone(), fast_policy(), Duration::from_secs(1));
        let token = CancellationToken::new();
        token.cancel();

        let err = client
            .upsert_entries(&[entry("a", &[1.0])], &token, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled(_)));
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_skips_missing() {
        let index = Arc::new(InMemoryCloudIndex::new());
        index.insert("a", &[1.0]).await.unwrap();
        let client = CloudSearchClient::new(index.clone(), fast_policy(), Duration::from_secs(1));

        let removed = client
            .delete_chunks(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().await, 0);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = CloudIndexConfig {
            provider: "pinecone".to_string(),
            ..CloudIndexConfig::default()
        };
        assert!(create_cloud_index(&config, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_http_urls() {
        let index = HttpCloudIndex::new(
            "https://vector.example.com/",
            "projects/p/indexes/i",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            index.url("findNeighbors"),
            "https://vector.example.com/v1/projects/p/indexes/i:findNeighbors"
        );
    }

    #[test]
    fn test_find_neighbors_response_parsing() {
        let json = r#"{"nearestNeighbors":[{"neighbors":[
            {"datapoint":{"datapointId":"file_x_chunk_0"},"distance":0.91},
            {"datapoint":{"datapointId":"file_x_chunk_1"},"distance":0.4}
        ]}]}"#;
        let parsed: FindNeighborsResponse = serde_json::from_str(json).unwrap();
        let neighbors = &parsed.nearest_neighbors[0].neighbors;
        assert_eq!(neighbors[0].datapoint.datapoint_id, "file_x_chunk_0");
        assert!((neighbors[1].distance - 0.4).abs() < 1e-6);
    }
}
