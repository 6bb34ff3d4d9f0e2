//! Config command handler.

use clap::{Args, Subcommand};
use ragbridge_core::{config::AppConfig, AppResult};
use ragbridge_knowledge::config::{get_config_path, load_config, save_config};

/// Inspect the engine configuration
#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration and print the effective values
    Check,
    /// Write the effective configuration to .ragbridge/rag.yaml
    Init,
}

impl ConfigCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let path = get_config_path(&config.workspace);
        // load_config validates before returning.
        let rag_config = load_config(&config.workspace)?;

        match self.action {
            ConfigAction::Check => {
                println!("# {} (valid)", path.display());
                println!("# generation: {} / {}", config.provider, config.model);
                println!(
                    "# embeddings: {} / {} ({} dims)",
                    config.embedding.provider, config.embedding.model, config.embedding.dimensions
                );
                print!("{}", serde_yaml::to_string(&rag_config)?);
            }
            ConfigAction::Init => {
                save_config(&config.workspace, &rag_config)?;
                println!("Wrote {}", path.display());
            }
        }

        Ok(())
    }
}
