//! Hybrid retrieval-augmented answering over uploaded documents.
//!
//! Documents are chunked, embedded once through a shared cache and written
//! to two vector backends: an in-process index and a cloud mirror. Queries
//! search both, fuse the ranked lists with weighted reciprocal rank fusion
//! and answer in one of three modes depending on how strong the evidence is.
//!
//! # Example
//! ```no_run
//! use ragbridge_knowledge::{EngineServices, IngestRequest, RagConfig, RagEngine};
//!
//! # async fn example() -> ragbridge_core::AppResult<()> {
//! let config = RagConfig::default();
//! let engine = RagEngine::new(config.clone(), EngineServices::offline(".", &config))?;
//!
//! let job_id = engine
//!     .ingest(IngestRequest::new(b"Rust is a systems language.".to_vec(), "text/plain", "rust.txt"))
//!     .await?;
//! println!("{}", engine.get_job_status(&job_id).await?.format_simple());
//!
//! let answer = engine.answer("What is Rust?").await?;
//! println!("[{}] {}", answer.mode, answer.answer);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod chunker;
pub mod cloud;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod extract;
pub mod jobs;
mod pipeline;
pub mod rag;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use blob::{BlobStore, DownloadHandle, LocalBlobStore};
pub use cloud::{CloudSearchClient, CloudVectorIndex, HttpCloudIndex, InMemoryCloudIndex};
pub use config::{load_config, save_config, RagConfig};
pub use engine::{EngineServices, EngineStats, RagEngine, RepairReport, RestoreReport};
pub use extract::{mime_for_path, PlainTextExtractor, TextExtractor};
pub use jobs::{JobStage, ProcessingJob};
pub use pipeline::RepairTask;
pub use rag::{AnswerEnvelope, AnswerMode, CitedChunk, RetrievalMetrics, SearchResult};
pub use types::{Chunk, Document, ErrorInfo, IngestRequest, JobStatus};
