//! Ask command handler.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppResult};
use ragbridge_knowledge::AnswerEnvelope;

/// Ask a question over the indexed documents
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Output the full answer envelope as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");

        let engine = open_engine(config).await?;
        let envelope = engine.answer(&self.question).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        } else {
            print_envelope(&envelope);
        }

        Ok(())
    }
}

fn print_envelope(envelope: &AnswerEnvelope) {
    if let Some(error) = &envelope.error {
        println!("Error ({}): {}", error.kind, error.message);
        return;
    }

    println!("Answer:");
    println!("{}", envelope.answer);
    println!();
    println!(
        "Mode: {} (confidence {:.2}, {} ms)",
        envelope.mode, envelope.confidence, envelope.timing.total_ms
    );

    if envelope.sources.is_empty() {
        println!("Sources: (none)");
    } else {
        println!("Sources:");
        for source in &envelope.sources {
            println!(
                "- {} #{} (similarity {:.2}): {}",
                source.document_name, source.ordinal, source.similarity, source.snippet
            );
        }
    }
}
