//! Batched price update shared by the refresh loop and read paths.

use coincache_cache::{Cache, Tag};
use coincache_core::error::{ServiceResult, UpstreamError};
use coincache_core::traits::{CoinStore, PriceSource};
use coincache_core::types::{PriceQuotes, RefreshOutcome};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches prices upstream, persists them and invalidates cached prices.
pub struct PriceUpdater {
    store: Arc<dyn CoinStore>,
    source: Arc<dyn PriceSource>,
    cache: Arc<Cache>,
    timeout: Duration,
}

impl PriceUpdater {
    pub fn new(
        store: Arc<dyn CoinStore>,
        source: Arc<dyn PriceSource>,
        cache: Arc<Cache>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            cache,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CoinStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn source(&self) -> &Arc<dyn PriceSource> {
        &self.source
    }

    /// Refresh prices for `coin_ids` with one upstream call.
    ///
    /// Ids missing from the upstream response keep their stored values.
    /// Cached price entries for every requested id are dropped afterwards.
    pub async fn update(&self, coin_ids: &[String]) -> ServiceResult<RefreshOutcome> {
        let mut ids: Vec<String> = coin_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(RefreshOutcome::default());
        }

        let quotes = tokio::time::timeout(self.timeout, self.source.batch_price(&ids))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout.as_secs()))??;

        let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let quotes: PriceQuotes = quotes
            .into_iter()
            .filter(|(coin_id, quote)| {
                if !requested.contains(coin_id.as_str()) {
                    debug!(%coin_id, "Ignoring unrequested quote");
                    return false;
                }
                if quote.usd < Decimal::ZERO {
                    warn!(%coin_id, usd = %quote.usd, "Ignoring negative price from upstream");
                    return false;
                }
                true
            })
            .collect();

        let updated = self.store.apply_prices(&quotes).await?;

        let tags: Vec<Tag> = ids.iter().map(Tag::price).collect();
        self.cache.invalidate_tags(&tags).await;

        let outcome = RefreshOutcome {
            requested: ids.len(),
            quoted: quotes.len(),
            updated,
        };
        debug!(
            source = self.source.name(),
            requested = outcome.requested,
            quoted = outcome.quoted,
            updated = outcome.updated,
            "Prices updated"
        );
        Ok(outcome)
    }
}
