//! Validate configuration command.

use anyhow::Result;
use coincache_config::load_config;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {:?}", config_path);
    if !config_path.exists() {
        println!("File not found, using defaults and environment overrides");
    }

    match load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("App: {}", config.app.name);
            println!("Environment: {}", config.app.environment);
            println!("Database: {}", config.database.path);
            println!("Upstream: {}", config.upstream.base_url);
            println!(
                "Refresh: every {}s (backoff {}s, enabled: {})",
                config.refresh.interval_secs, config.refresh.backoff_secs, config.refresh.enabled
            );
            println!();
            println!("{}", config.to_toml()?);
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
