//! Search command handler.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};

/// Show what retrieval finds for a question, without generating an answer
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// The question to search for
    pub question: String,

    /// Output candidates and metrics as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command");

        let engine = open_engine(config).await?;
        let result = engine.search(&self.question).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        let metrics = &result.metrics;
        println!(
            "Mode: {} (max similarity {:.2}, {} retained of {} candidates, {} ms)",
            result.mode,
            metrics.max_similarity,
            metrics.retained_count,
            metrics.candidate_count,
            result.timing.total_ms
        );
        if metrics.local_failed {
            println!("Local search failed; cloud results only");
        }
        if metrics.cloud_failed {
            println!("Cloud search failed; local results only");
        }

        if result.candidates.is_empty() {
            println!("No candidates above {:.2}", metrics.min_similarity);
        }
        for (rank, candidate) in result.candidates.iter().enumerate() {
            println!(
                "{:>2}. {} #{}  fused {:.4}  similarity {:.2}",
                rank + 1,
                candidate.document_name,
                candidate.ordinal,
                candidate.fused_score,
                candidate.similarity
            );
            println!("    {}", candidate.snippet);
        }

        Ok(())
    }
}
