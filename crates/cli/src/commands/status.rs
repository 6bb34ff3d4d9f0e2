//! Status command handler.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};

/// List documents and their processing status
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Show a single document
    pub file_id: Option<String>,

    /// Include a download link for each document
    #[arg(long)]
    pub links: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing status command");

        let engine = open_engine(config).await?;
        let documents = match &self.file_id {
            Some(file_id) => vec![engine.get_document(file_id).await?],
            None => engine.list_documents().await,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&documents)?);
            return Ok(());
        }

        if documents.is_empty() {
            println!("No documents");
            return Ok(());
        }

        for document in &documents {
            println!(
                "{}  {:<10} {:>8} bytes  {}",
                document.file_id, document.status, document.size_bytes, document.name
            );
            if self.links {
                match engine.download_handle(&document.file_id).await {
                    Ok(handle) => println!("    {} (expires {})", handle.url, handle.expires_at),
                    Err(e) => println!("    no download link: {}", e),
                }
            }
        }

        Ok(())
    }
}
