use std::sync::Arc;

use clap::Subcommand;
use docindex_core::RebuildCoordinator;

use crate::config::{AppConfig, SAMPLE_CONFIG};
use crate::documents::{FsDocumentSource, FsIndexer};

pub mod rebuild;
pub mod serve;

#[derive(Subcommand, PartialEq, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Print a complete sample configuration file
    Sample,
}

#[derive(Subcommand, PartialEq, Debug)]
pub enum Commands {
    /// Get CLI Version
    Version,

    /// Serve rebuild control and the live progress stream over HTTP
    Serve {
        /// Address to bind (overrides the configured one)
        #[arg(long)]
        bind: Option<String>,

        /// Start a rebuild as soon as the server is listening
        #[arg(long, default_value_t = false)]
        rebuild_on_start: bool,
    },

    /// Run one rebuild in the foreground and print its progress
    Rebuild {
        /// Print every event as a JSON line instead of a progress line
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Commands {
    pub async fn run(self, config: AppConfig) -> Result<(), String> {
        match self {
            Commands::Version => {
                println!("docindex v{}", env!("CARGO_PKG_VERSION"));
            }
            Commands::Serve {
                bind,
                rebuild_on_start,
            } => serve::handle_serve(&config, bind, rebuild_on_start).await?,
            Commands::Rebuild { json } => rebuild::handle_rebuild(&config, json).await?,
            Commands::Config(config_command) => match config_command {
                ConfigCommands::Show => {
                    println!("# Loaded from {}", config.config_path.display());
                    print!("{}", config.to_toml()?);
                }
                ConfigCommands::Sample => {
                    print!("{}", SAMPLE_CONFIG);
                }
            },
        }
        Ok(())
    }
}

/// Wires the filesystem source and indexer for `config.root` into a coordinator.
pub(crate) fn build_coordinator(config: &AppConfig) -> RebuildCoordinator {
    RebuildCoordinator::new(
        Arc::new(FsDocumentSource::new(
            config.root.clone(),
            config.extensions.clone(),
        )),
        Arc::new(FsIndexer::new(config.root.clone())),
        config.rebuild.clone(),
    )
}
