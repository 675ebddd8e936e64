//! Component wiring shared by the commands.

use anyhow::{Context, Result};
use coincache_cache::Cache;
use coincache_config::AppConfig;
use coincache_core::traits::{CoinStore, PriceSource};
use coincache_refresh::{PriceUpdater, RefreshConfig, RefreshEngine};
use coincache_service::{CoinService, ServiceConfig};
use coincache_store::open_sqlite;
use coincache_upstream::{CoinGeckoConfig, CoinGeckoSource};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Assembled service components.
pub struct App {
    pub service: Arc<CoinService>,
    pub engine: Arc<RefreshEngine>,
    store: Arc<dyn CoinStore>,
}

impl App {
    /// Open the SQLite store and CoinGecko client described by `config`.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = open_sqlite(Path::new(&config.database.path))
            .await
            .with_context(|| format!("Failed to open database {}", config.database.path))?;
        debug!(path = %config.database.path, "Database ready");

        let api_key = config.upstream.api_key();
        if api_key.is_none() {
            warn!(
                var = %config.upstream.api_key_env,
                "No CoinGecko API key set; public rate limits apply"
            );
        }
        let source = CoinGeckoSource::new(CoinGeckoConfig::new(
            config.upstream.base_url.clone(),
            api_key,
            config.upstream.timeout(),
        ))
        .context("Failed to create CoinGecko client")?;

        Ok(Self::assemble(&config, Arc::new(store), Arc::new(source)))
    }

    /// Wire the cache, updater, refresh engine and accessor over a store and source.
    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn CoinStore>,
        source: Arc<dyn PriceSource>,
    ) -> Self {
        let cache = Arc::new(Cache::in_memory());
        let updater = Arc::new(PriceUpdater::new(
            Arc::clone(&store),
            source,
            Arc::clone(&cache),
            config.upstream.timeout(),
        ));

        let engine = Arc::new(RefreshEngine::new(
            Arc::clone(&updater),
            RefreshConfig {
                interval: config.refresh.interval(),
                backoff: config.refresh.backoff(),
            },
        ));

        let service = Arc::new(CoinService::new(
            updater,
            cache,
            ServiceConfig {
                entry_ttl: config.cache.entry_ttl(),
                top_ttl: config.cache.top_ttl(),
                refresh_prices_on_list: config.service.refresh_prices_on_list,
            },
        ));

        Self {
            service,
            engine,
            store,
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }
}
