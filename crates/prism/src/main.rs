//! Prism CLI - event-driven image variant pipeline.
//!
//! Prism takes object-created notifications as input, derives resized
//! variants of the referenced image, optionally labels it, and publishes the
//! results next to a metadata record in an output container.
//!
//! # Usage
//!
//! ```bash
//! # Handle a notification document
//! prism handle event.json
//!
//! # Read the notification from stdin, redeliver transient failures
//! cat event.json | prism handle - --max-attempts 3 --dead-letter dead.jsonl
//!
//! # Process one object directly
//! prism handle --source uploads/photos/cat.jpg
//!
//! # View configuration
//! prism config show
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;

/// Prism - resize, label, and publish uploaded images.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true, env = "PRISM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Process an object-created notification
    Handle(cli::handle::HandleArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match &cli.config {
        Some(path) => prism_core::Config::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => match prism_core::Config::load() {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load config: {e}\n  \
                     Using default configuration. Check your config file with `prism config path`."
                );
                prism_core::Config::default()
            }
        },
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Prism v{}", prism_core::VERSION);

    match cli.command {
        Commands::Handle(args) => cli::handle::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, config, cli.config).await,
    }
}
