//! Chunks command handler.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};

/// List the chunks of one document
#[derive(Args, Debug)]
pub struct ChunksCommand {
    /// Document id
    pub file_id: String,

    /// Print full chunk text instead of a preview
    #[arg(long)]
    pub full: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

const PREVIEW_CHARS: usize = 80;

impl ChunksCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(file_id = %self.file_id, "Executing chunks command");

        let engine = open_engine(config).await?;
        let chunks = engine.document_chunks(&self.file_id).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&chunks)?);
            return Ok(());
        }

        println!("{} chunks in {}", chunks.len(), self.file_id);
        for chunk in &chunks {
            let text = if self.full {
                chunk.text.clone()
            } else {
                preview(&chunk.text)
            };
            println!("{} ({} chars): {}", chunk.id, chunk.char_len, text);
        }

        Ok(())
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}
