//! Stats command handler.
//!
//! Statistics cover the current process; counters start from zero on
//! every invocation, while document and index figures come from the
//! restored snapshot.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};

/// Show engine statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let engine = open_engine(config).await?;
        let stats = engine.stats().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        println!("Documents:");
        if stats.documents_by_status.is_empty() {
            println!("  (none)");
        }
        for (status, count) in &stats.documents_by_status {
            println!("  {}: {}", status, count);
        }
        println!("Chunks: {}", stats.chunk_count);
        println!("Local index entries: {}", stats.local_index_entries);
        println!("Cloud backend: {}", stats.cloud_backend);
        println!(
            "Embedding cache: {} entries, {} hits, {} misses, {} evictions",
            stats.cache.entries, stats.cache.hits, stats.cache.misses, stats.cache.evictions
        );
        if !stats.pending_repairs.is_empty() {
            println!("Pending repairs: {}", stats.pending_repairs.len());
        }

        Ok(())
    }
}
