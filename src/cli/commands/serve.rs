//! Serve command implementation.

use anyhow::{Context, Result};
use coincache_config::AppConfig;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::App;
use crate::cli::ServeArgs;
use crate::http::{self, AppState};

pub async fn run(args: ServeArgs, mut config: AppConfig) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let addr = config.server.bind_addr();

    let app = App::build(config.clone()).await?;

    let refresh = if config.refresh.enabled && !args.no_refresh {
        Some(app.engine.start())
    } else {
        info!("Background refresh disabled; prices refresh on demand only");
        None
    };

    let state = Arc::new(AppState {
        service: Arc::clone(&app.service),
        engine: Arc::clone(&app.engine),
        refresh: refresh.clone(),
        default_list_limit: config.service.default_list_limit,
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, store = app.store_name(), "Listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = refresh {
        handle.shutdown().await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
