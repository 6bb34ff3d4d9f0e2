//! Ragbridge CLI
//!
//! Main entry point for the ragbridge command-line tool.
//! Uploads documents, tracks their processing and answers questions over them.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    AskCommand, ChunksCommand, ConfigCommand, DeleteCommand, IngestCommand, SearchCommand,
    StatsCommand, StatusCommand,
};
use ragbridge_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Ragbridge - hybrid retrieval-augmented answers over your documents
#[derive(Parser, Debug)]
#[command(name = "ragbridge")]
#[command(about = "Hybrid retrieval-augmented answers over your documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "RAGBRIDGE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "RAGBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Generation provider (ollama, mock)
    #[arg(short, long, global = true, env = "RAGBRIDGE_PROVIDER")]
    provider: Option<String>,

    /// Generation model identifier
    #[arg(short, long, global = true, env = "RAGBRIDGE_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload files or directories and wait for them to be indexed
    Ingest(IngestCommand),

    /// Ask a question over the indexed documents
    Ask(AskCommand),

    /// Show retrieval results for a question without generating an answer
    Search(SearchCommand),

    /// Delete a document and its index entries
    Delete(DeleteCommand),

    /// List documents and their processing status
    Status(StatusCommand),

    /// List the chunks of a document
    Chunks(ChunksCommand),

    /// Show engine statistics
    Stats(StatsCommand),

    /// Inspect the engine configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from file and environment
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.json_logs,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.json_logs)?;

    tracing::info!("Ragbridge CLI starting");
    tracing::debug!(workspace = ?config.workspace, provider = %config.provider, model = %config.model);

    config.validate()?;
    config.ensure_state_dir()?;

    let command_name = match &cli.command {
        Commands::Ingest(_) => "ingest",
        Commands::Ask(_) => "ask",
        Commands::Search(_) => "search",
        Commands::Delete(_) => "delete",
        Commands::Status(_) => "status",
        Commands::Chunks(_) => "chunks",
        Commands::Stats(_) => "stats",
        Commands::Config(_) => "config",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ingest(cmd) => cmd.execute(&config).await,
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Delete(cmd) => cmd.execute(&config).await,
        Commands::Status(cmd) => cmd.execute(&config).await,
        Commands::Chunks(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
        Commands::Config(cmd) => cmd.execute(&config),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
