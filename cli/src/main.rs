use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod documents;

use commands::Commands;
use config::AppConfig;

#[derive(Parser, PartialEq, Debug)]
#[command(name = "docindex")]
#[command(about = "Rebuild a document index and stream its progress", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ~/.docindex/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long = "debug", global = true, default_value_t = false)]
    debug: bool,

    /// Directory to index (overrides config and DOCINDEX_ROOT)
    #[arg(long = "root", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(root) = cli.root {
        config.root = root;
    }

    let _log_guard = init_tracing(cli.debug, config.log_dir.as_deref());

    if let Err(e) = cli.command.run(config).await {
        eprintln!("Ops! something went wrong: {}", e);
        std::process::exit(1);
    }
}

/// Installs the global subscriber. Logs go to stderr with `--debug` and to a
/// daily rolling file when `log_dir` is configured; otherwise nothing is installed.
fn init_tracing(debug: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_directives = if debug {
        format!(
            "warn,{}=debug,docindex_core=debug,docindex_server=debug",
            env!("CARGO_CRATE_NAME")
        )
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "docindex.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let stderr_layer = debug
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();
            Some(guard)
        }
        None if debug => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
        None => None,
    }
}
