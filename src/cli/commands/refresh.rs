//! One-shot refresh command.

use anyhow::{Context, Result};
use coincache_config::AppConfig;
use tracing::info;

use crate::app::App;

pub async fn run(config: AppConfig) -> Result<()> {
    let app = App::build(config).await?;
    info!("Running one refresh cycle");

    let outcome = app
        .engine
        .run_cycle()
        .await
        .context("Refresh cycle failed")?;

    println!("Coins requested: {}", outcome.requested);
    println!("Quotes received: {}", outcome.quoted);
    println!("Prices updated:  {}", outcome.updated);
    if outcome.missing() > 0 {
        println!("Missing upstream: {}", outcome.missing());
    }

    Ok(())
}
