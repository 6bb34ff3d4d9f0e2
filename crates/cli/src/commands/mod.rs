//! Command handlers for the ragbridge CLI.
//!
//! Each command opens the engine over the workspace snapshot, does its
//! work and, when it changed anything, writes the snapshot back.

pub mod ask;
pub mod chunks;
pub mod config;
pub mod delete;
pub mod ingest;
pub mod search;
pub mod stats;
pub mod status;

pub use ask::AskCommand;
pub use chunks::ChunksCommand;
pub use config::ConfigCommand;
pub use delete::DeleteCommand;
pub use ingest::IngestCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;
pub use status::StatusCommand;

use ragbridge_core::{config::AppConfig, AppResult};
use ragbridge_knowledge::{load_config, EngineServices, RagEngine};

/// Build the engine and restore the persisted index.
///
/// The in-memory cloud index starts empty in every process, so it is
/// re-mirrored from the snapshot.
pub async fn open_engine(config: &AppConfig) -> AppResult<RagEngine> {
    let rag_config = load_config(&config.workspace)?;
    let resync_cloud = rag_config.cloud.provider == "memory";

    let services = EngineServices::from_app_config(config, &rag_config)?;
    let engine = RagEngine::new(rag_config, services)?;

    let report = engine.restore(resync_cloud).await?;
    tracing::debug!(
        documents = report.documents,
        chunks = report.chunks,
        skipped = report.skipped,
        "Opened engine"
    );
    Ok(engine)
}
