//! Engine configuration management.
//!
//! Loaded from `.ragbridge/rag.yaml`; every field has a default so a
//! missing or partial file is valid.

use ragbridge_core::config::STATE_DIR;
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Recognized engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Target chunk length in characters
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,

    /// Candidates whose best raw similarity is below this are dropped
    pub min_similarity: f32,

    /// Max similarity at or above this selects `rag` mode
    pub high_confidence_threshold: f32,

    pub local_weight: f32,
    pub cloud_weight: f32,

    /// RRF smoothing constant `k`
    pub rrf_k: u32,

    /// Fused results kept per answer
    pub max_results: usize,

    /// Top-N requested from each backend
    pub candidates_per_backend: usize,

    /// Embedding cache capacity (entries)
    pub cache_capacity: usize,

    /// Confidence reported for `knowledge` answers
    pub knowledge_confidence: f32,

    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,

    /// A job with no progress for this long is reported as failed
    pub stall_timeout_secs: u64,

    pub max_concurrent_jobs: usize,

    /// Concurrent embedding calls per ingestion job
    pub embedding_concurrency: usize,

    /// Lifetime of blob download handles
    pub download_ttl_secs: u64,

    pub generation_temperature: f32,
    pub generation_max_tokens: u32,

    pub cloud: CloudIndexConfig,
}

/// Retry budget applied to every external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Per-call timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub generation_ms: u64,
    pub cloud_search_ms: u64,
    pub local_search_ms: u64,
    pub blob_ms: u64,
    pub extraction_ms: u64,
}

/// Which cloud vector index to talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudIndexConfig {
    /// "memory" or "http"
    pub provider: String,

    /// Base URL of the index endpoint (http provider)
    pub endpoint: Option<String>,

    /// Index identifier used in request paths
    pub index_id: Option<String>,

    /// Environment variable holding the bearer token
    pub token_env: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            min_similarity: 0.6,
            high_confidence_threshold: 0.85,
            local_weight: 0.6,
            cloud_weight: 0.4,
            rrf_k: 60,
            max_results: 5,
            candidates_per_backend: 10,
            cache_capacity: 10_000,
            knowledge_confidence: 0.5,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            stall_timeout_secs: 300,
            max_concurrent_jobs: 4,
            embedding_concurrency: 4,
            download_ttl_secs: 24 * 60 * 60,
            generation_temperature: 0.3,
            generation_max_tokens: 1000,
            cloud: CloudIndexConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: 30_000,
            generation_ms: 120_000,
            cloud_search_ms: 10_000,
            local_search_ms: 5_000,
            blob_ms: 30_000,
            extraction_ms: 60_000,
        }
    }
}

impl Default for CloudIndexConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            endpoint: None,
            index_id: None,
            token_env: "RAGBRIDGE_CLOUD_TOKEN".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    pub fn cloud_search(&self) -> Duration {
        Duration::from_millis(self.cloud_search_ms)
    }

    pub fn local_search(&self) -> Duration {
        Duration::from_millis(self.local_search_ms)
    }

    pub fn blob(&self) -> Duration {
        Duration::from_millis(self.blob_ms)
    }

    pub fn extraction(&self) -> Duration {
        Duration::from_millis(self.extraction_ms)
    }
}

fn check_unit(name: &str, value: f32) -> AppResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_nonzero(name: &str, value: u64) -> AppResult<()> {
    if value == 0 {
        return Err(AppError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

impl RagConfig {
    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> AppResult<()> {
        check_unit("min_similarity", self.min_similarity)?;
        check_unit("high_confidence_threshold", self.high_confidence_threshold)?;
        check_unit("knowledge_confidence", self.knowledge_confidence)?;

        if self.high_confidence_threshold < self.min_similarity {
            return Err(AppError::Config(format!(
                "high_confidence_threshold ({}) must not be below min_similarity ({})",
                self.high_confidence_threshold, self.min_similarity
            )));
        }

        if self.local_weight < 0.0 || self.cloud_weight < 0.0 {
            return Err(AppError::Config(
                "Fusion weights must not be negative".to_string(),
            ));
        }
        if ((self.local_weight + self.cloud_weight) - 1.0).abs() > 1e-6 {
            return Err(AppError::Config(format!(
                "Fusion weights must sum to 1, got {} + {}",
                self.local_weight, self.cloud_weight
            )));
        }

        check_nonzero("chunk_size", self.chunk_size as u64)?;
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        check_nonzero("rrf_k", self.rrf_k as u64)?;
        check_nonzero("max_results", self.max_results as u64)?;
        check_nonzero("candidates_per_backend", self.candidates_per_backend as u64)?;
        check_nonzero("cache_capacity", self.cache_capacity as u64)?;
        check_nonzero("retry.max_attempts", self.retry.max_attempts as u64)?;
        check_nonzero("max_concurrent_jobs", self.max_concurrent_jobs as u64)?;
        check_nonzero("embedding_concurrency", self.embedding_concurrency as u64)?;
        check_nonzero("stall_timeout_secs", self.stall_timeout_secs)?;

        check_nonzero("timeouts.embedding_ms", self.timeouts.embedding_ms)?;
        check_nonzero("timeouts.generation_ms", self.timeouts.generation_ms)?;
        check_nonzero("timeouts.cloud_search_ms", self.timeouts.cloud_search_ms)?;
        check_nonzero("timeouts.local_search_ms", self.timeouts.local_search_ms)?;
        check_nonzero("timeouts.blob_ms", self.timeouts.blob_ms)?;
        check_nonzero("timeouts.extraction_ms", self.timeouts.extraction_ms)?;

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(AppError::Config(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".to_string(),
            ));
        }

        match self.cloud.provider.as_str() {
            "memory" => {}
            "http" => {
                if self.cloud.endpoint.is_none() || self.cloud.index_id.is_none() {
                    return Err(AppError::Config(
                        "cloud.provider 'http' requires cloud.endpoint and cloud.index_id"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(AppError::Config(format!(
                    "Unknown cloud index provider: {}. Supported: memory, http",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Load engine configuration.
///
/// Reads `.ragbridge/rag.yaml` if it exists, otherwise returns defaults.
/// The result is validated either way.
pub fn load_config(workspace: &Path) -> AppResult<RagConfig> {
    let config_path = get_config_path(workspace);

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: RagConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded engine config from {:?}", config_path);
        config
    } else {
        tracing::debug!("Using default engine config (no config file found)");
        RagConfig::default()
    };

    config.validate()?;
    Ok(config)
}

/// Save engine configuration.
pub fn save_config(workspace: &Path, config: &RagConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let yaml = serde_yaml::to_string(config)?;
    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved engine config to {:?}", config_path);
    Ok(())
}

/// Get the path to the engine config file.
pub fn get_config_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("rag.yaml")
}

/// Get the path of the persisted index snapshot.
pub fn get_snapshot_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("index.json")
}

/// Get the directory holding uploaded originals.
pub fn get_blob_dir(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("blobs")
}
