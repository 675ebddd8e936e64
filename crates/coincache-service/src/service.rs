//! Read-through accessor.

use chrono::Utc;
use coincache_cache::{Cache, CacheKey, CacheLookup, Tag};
use coincache_core::error::{ServiceError, ServiceResult, StoreError};
use coincache_core::traits::CoinStore;
use coincache_core::types::{Coin, CoinView, PriceRecord};
use coincache_refresh::PriceUpdater;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Accessor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// TTL for coin, list and price entries
    pub entry_ttl: Duration,
    /// TTL for the top-by-market-cap view
    pub top_ttl: Duration,
    /// Refresh listed ids upstream before attaching prices to a list
    pub refresh_prices_on_list: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(10),
            top_ttl: Duration::from_secs(300),
            refresh_prices_on_list: true,
        }
    }
}

/// Accept only upstream-style ids: lowercase ASCII letters, digits, `-` and `_`.
///
/// Anything else could break cache keys, comma-joined id lists or the
/// upstream URL path.
pub fn validate_coin_id(coin_id: &str) -> ServiceResult<()> {
    if coin_id.is_empty() {
        return Err(ServiceError::Validation("coin id must not be empty".into()));
    }
    if !coin_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ServiceError::Validation(format!("invalid coin id `{}`", coin_id)));
    }
    Ok(())
}

/// Coins served cache-first, prices refreshed on every read, and writes that
/// keep the cache honest.
pub struct CoinService {
    store: Arc<dyn CoinStore>,
    updater: Arc<PriceUpdater>,
    cache: Arc<Cache>,
    config: ServiceConfig,
}

impl CoinService {
    pub fn new(updater: Arc<PriceUpdater>, cache: Arc<Cache>, config: ServiceConfig) -> Self {
        Self {
            store: Arc::clone(updater.store()),
            updater,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn config(&self) -> ServiceConfig {
        self.config
    }

    /// Read one coin.
    pub async fn read_coin(&self, coin_id: &str, include_metadata: bool) -> ServiceResult<CoinView> {
        validate_coin_id(coin_id)?;
        let key = CacheKey::coin(coin_id, include_metadata);
        let fill = match self.cache.lookup(&key).await {
            CacheLookup::Hit(view) => return Ok(view),
            CacheLookup::Miss => true,
            CacheLookup::Unavailable => false,
        };

        let view = self.store.get(coin_id).await?.view(include_metadata);
        if fill {
            self.cache
                .put(&key, &view, self.config.entry_ttl, &[Tag::coin(coin_id)])
                .await;
        }
        Ok(view)
    }

    /// Read a page of coins ordered by id.
    ///
    /// With `include_prices`, the listed ids are refreshed upstream first
    /// unless the refresh-on-list switch is off.
    pub async fn read_coin_list(
        &self,
        skip: usize,
        limit: usize,
        include_metadata: bool,
        include_prices: bool,
    ) -> ServiceResult<Vec<CoinView>> {
        let key = CacheKey::coin_list(skip, limit, include_metadata, include_prices);
        let fill = match self.cache.lookup(&key).await {
            CacheLookup::Hit(views) => return Ok(views),
            CacheLookup::Miss => true,
            CacheLookup::Unavailable => false,
        };

        let coins = self.store.list(skip, limit).await?;
        let ids: Vec<String> = coins.iter().map(|c| c.coin_id.clone()).collect();
        let mut tags: Vec<Tag> = Vec::with_capacity(ids.len() * 2 + 1);
        tags.push(Tag::CoinList);
        tags.extend(ids.iter().map(Tag::coin));

        let views = if include_prices && !ids.is_empty() {
            if self.config.refresh_prices_on_list {
                self.updater.update(&ids).await?;
            }
            let mut prices: HashMap<String, PriceRecord> = self
                .store
                .get_prices(&ids)
                .await?
                .into_iter()
                .map(|p| (p.coin_id.clone(), p))
                .collect();
            tags.extend(ids.iter().map(Tag::price));

            coins
                .iter()
                .map(|coin| {
                    let view = coin.view(include_metadata);
                    match prices.remove(&coin.coin_id) {
                        Some(price) => view.with_price(&price),
                        None => view,
                    }
                })
                .collect()
        } else {
            coins.iter().map(|c| c.view(include_metadata)).collect::<Vec<_>>()
        };

        if fill {
            self.cache.put(&key, &views, self.config.entry_ttl, &tags).await;
        }
        Ok(views)
    }

    /// Track a coin, or refresh it when already tracked.
    ///
    /// Returns the coin with metadata and its freshly refreshed price.
    pub async fn create_coin(&self, coin_id: &str) -> ServiceResult<CoinView> {
        validate_coin_id(coin_id)?;

        if self.store.exists(coin_id).await? {
            debug!(%coin_id, "Coin already tracked, refreshing price");
            return self.refresh_and_read(coin_id).await;
        }

        let mut profile = self.updater.source().lookup_metadata(coin_id).await?;
        profile.coin_id = coin_id.to_string();
        let coin = Coin::from_profile(profile, Utc::now());

        match self.store.insert(coin).await {
            Ok(coin) => info!(coin_id = %coin.coin_id, symbol = %coin.symbol, "Coin created"),
            Err(StoreError::AlreadyExists(_)) => {
                debug!(%coin_id, "Coin created concurrently");
            }
            Err(e) => return Err(e.into()),
        }

        self.cache
            .invalidate_tags(&[Tag::coin(coin_id), Tag::price(coin_id), Tag::CoinList])
            .await;
        self.refresh_and_read(coin_id).await
    }

    async fn refresh_and_read(&self, coin_id: &str) -> ServiceResult<CoinView> {
        self.updater.update(&[coin_id.to_string()]).await?;
        let coin = self.store.get(coin_id).await?;
        let price = self.store.get_price(coin_id).await?;
        Ok(coin.view(true).with_price(&price))
    }

    /// Stop tracking a coin.
    pub async fn delete_coin(&self, coin_id: &str) -> ServiceResult<()> {
        validate_coin_id(coin_id)?;
        self.store.delete(coin_id).await?;
        self.cache
            .invalidate_tags(&[Tag::coin(coin_id), Tag::price(coin_id), Tag::CoinList])
            .await;
        info!(%coin_id, "Coin deleted");
        Ok(())
    }

    /// Read one price after refreshing it upstream.
    ///
    /// Every call goes upstream; the result is then written to the cache for
    /// other readers of the same key.
    pub async fn read_price(&self, coin_id: &str) -> ServiceResult<PriceRecord> {
        validate_coin_id(coin_id)?;

        // Unknown coins fail before any upstream traffic
        self.store.get_price(coin_id).await?;
        self.updater.update(&[coin_id.to_string()]).await?;
        let price = self.store.get_price(coin_id).await?;

        self.cache
            .put(&CacheKey::price(coin_id), &price, self.config.entry_ttl, &[Tag::price(coin_id)])
            .await;
        Ok(price)
    }

    /// Read prices for several coins after refreshing them upstream.
    ///
    /// Unknown ids are left out; the result is ordered by id and may be empty.
    pub async fn read_prices(&self, coin_ids: &[String]) -> ServiceResult<Vec<PriceRecord>> {
        if coin_ids.is_empty() {
            return Err(ServiceError::Validation("no coin ids given".into()));
        }
        for coin_id in coin_ids {
            validate_coin_id(coin_id)?;
        }

        let known: Vec<String> = self
            .store
            .get_prices(coin_ids)
            .await?
            .into_iter()
            .map(|p| p.coin_id)
            .collect();
        if known.is_empty() {
            return Ok(Vec::new());
        }

        self.updater.update(&known).await?;
        let prices = self.store.get_prices(&known).await?;

        // Tag unknown ids too so a later create drops this entry
        let tags: Vec<Tag> = coin_ids.iter().map(Tag::price).collect();
        self.cache
            .put(&CacheKey::prices(coin_ids), &prices, self.config.entry_ttl, &tags)
            .await;
        Ok(prices)
    }

    /// Coins with the largest market cap, with their stored prices.
    pub async fn read_top_coins(&self, limit: usize) -> ServiceResult<Vec<CoinView>> {
        let key = CacheKey::top_coins(limit);
        let fill = match self.cache.lookup(&key).await {
            CacheLookup::Hit(views) => return Ok(views),
            CacheLookup::Miss => true,
            CacheLookup::Unavailable => false,
        };

        let rows = self.store.top_by_market_cap(limit).await?;
        let mut tags = Vec::with_capacity(rows.len() + 1);
        tags.push(Tag::CoinList);
        tags.extend(rows.iter().map(|(coin, _)| Tag::coin(coin.coin_id.as_str())));

        let views: Vec<CoinView> = rows
            .iter()
            .map(|(coin, price)| coin.view(false).with_price(price))
            .collect();

        if fill {
            self.cache.put(&key, &views, self.config.top_ttl, &tags).await;
        }
        Ok(views)
    }
}
