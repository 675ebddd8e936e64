//! Coin cache service CLI.

mod app;
mod cli;
mod http;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use coincache_config::load_config;
use coincache_monitor::setup_logging;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ValidateConfig = cli.command {
        return cli::commands::validate::run(&cli.config).await;
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // Setup logging; CLI flags win over the config file
    let log_level = cli
        .log_level
        .map(|level| level.as_str().to_string())
        .unwrap_or_else(|| config.logging.level.clone());
    let json = cli.json_logs || config.logging.is_json();
    let _log_guard = setup_logging(&log_level, json, config.logging.file.as_deref().map(Path::new))
        .context("Failed to set up logging")?;

    // Execute command
    match cli.command {
        Commands::Serve(args) => cli::commands::serve::run(args, config).await,
        Commands::Refresh => cli::commands::refresh::run(config).await,
        Commands::ValidateConfig => Ok(()),
    }
}
