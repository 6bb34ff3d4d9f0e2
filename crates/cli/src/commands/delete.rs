//! Delete command handler.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};

/// Delete a document and its index entries
#[derive(Args, Debug)]
pub struct DeleteCommand {
    /// Document id (see `ragbridge status`)
    pub file_id: String,
}

impl DeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(file_id = %self.file_id, "Executing delete command");

        let engine = open_engine(config).await?;
        engine.delete_document(&self.file_id).await?;

        let repairs = engine.run_repairs().await?;
        if repairs.requeued > 0 {
            println!(
                "Warning: {} cloud delete(s) could not be completed",
                repairs.requeued
            );
        }

        engine.snapshot().await?;
        println!("Deleted {}", self.file_id);
        Ok(())
    }
}
