//! In-memory store for tests and ephemeral runs.

use async_trait::async_trait;
use chrono::Utc;
use coincache_core::error::StoreError;
use coincache_core::traits::CoinStore;
use coincache_core::types::{Coin, PriceQuotes, PriceRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    coins: BTreeMap<String, Coin>,
    prices: HashMap<String, PriceRecord>,
}

/// In-memory store with the same integrity rules as the SQLite store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of price records held.
    pub fn price_count(&self) -> usize {
        self.state.lock().map(|s| s.prices.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CoinStore for MemoryStore {
    async fn get(&self, coin_id: &str) -> Result<Coin, StoreError> {
        self.lock()?
            .coins
            .get(coin_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(coin_id.to_string()))
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Coin>, StoreError> {
        let state = self.lock()?;
        Ok(state.coins.values().skip(offset).take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.coins.len())
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.coins.keys().cloned().collect())
    }

    async fn insert(&self, coin: Coin) -> Result<Coin, StoreError> {
        let mut state = self.lock()?;
        if state.coins.contains_key(&coin.coin_id) {
            return Err(StoreError::AlreadyExists(coin.coin_id));
        }

        let price = PriceRecord::placeholder(coin.coin_id.clone(), coin.created_at);
        state.prices.insert(coin.coin_id.clone(), price);
        state.coins.insert(coin.coin_id.clone(), coin.clone());
        Ok(coin)
    }

    async fn delete(&self, coin_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.coins.remove(coin_id).is_none() {
            return Err(StoreError::NotFound(coin_id.to_string()));
        }
        state.prices.remove(coin_id);
        Ok(())
    }

    async fn get_price(&self, coin_id: &str) -> Result<PriceRecord, StoreError> {
        self.lock()?
            .prices
            .get(coin_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(coin_id.to_string()))
    }

    async fn get_prices(&self, coin_ids: &[String]) -> Result<Vec<PriceRecord>, StoreError> {
        let state = self.lock()?;
        let mut prices: Vec<PriceRecord> = coin_ids
            .iter()
            .filter_map(|id| state.prices.get(id).cloned())
            .collect();
        prices.sort_by(|a, b| a.coin_id.cmp(&b.coin_id));
        prices.dedup_by(|a, b| a.coin_id == b.coin_id);
        Ok(prices)
    }

    async fn apply_prices(&self, quotes: &PriceQuotes) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut state = self.lock()?;
        let mut updated = 0;

        for (coin_id, quote) in quotes {
            if let Some(record) = state.prices.get_mut(coin_id) {
                record.apply(quote, now);
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn top_by_market_cap(
        &self,
        limit: usize,
    ) -> Result<Vec<(Coin, PriceRecord)>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<(Coin, PriceRecord)> = state
            .coins
            .values()
            .filter_map(|coin| {
                state
                    .prices
                    .get(&coin.coin_id)
                    .map(|price| (coin.clone(), price.clone()))
            })
            .collect();

        // Largest cap first, unknown caps last, ties by id
        rows.sort_by(|(a_coin, a), (b_coin, b)| {
            match (a.usd_market_cap, b.usd_market_cap) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a_coin.coin_id.cmp(&b_coin.coin_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coincache_core::types::{CoinProfile, PriceQuote};
    use rust_decimal_macros::dec;

    fn coin(id: &str) -> Coin {
        Coin::from_profile(
            CoinProfile {
                coin_id: id.to_string(),
                symbol: id[..3.min(id.len())].to_string(),
                name: id.to_uppercase(),
                metadata: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_creates_placeholder_price() {
        let store = MemoryStore::new();
        store.insert(coin("bitcoin")).await.unwrap();

        let price = store.get_price("bitcoin").await.unwrap();
        assert_eq!(price.usd, dec!(0));
        assert_eq!(store.price_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_twice_is_already_exists() {
        let store = MemoryStore::new();
        store.insert(coin("bitcoin")).await.unwrap();

        let err = store.insert(coin("bitcoin")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_price() {
        let store = MemoryStore::new();
        store.insert(coin("bitcoin")).await.unwrap();
        store.delete("bitcoin").await.unwrap();

        assert!(store.get("bitcoin").await.unwrap_err().is_not_found());
        assert!(store.get_price("bitcoin").await.unwrap_err().is_not_found());
        assert!(store.delete("bitcoin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_orders_by_id() {
        let store = MemoryStore::new();
        for id in ["solana", "bitcoin", "ethereum"] {
            store.insert(coin(id)).await.unwrap();
        }

        let ids: Vec<String> = store
            .list(1, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.coin_id)
            .collect();
        assert_eq!(ids, vec!["ethereum", "solana"]);
    }

    #[tokio::test]
    async fn test_apply_prices_skips_unknown_ids() {
        let store = MemoryStore::new();
        store.insert(coin("bitcoin")).await.unwrap();

        let mut quotes = PriceQuotes::new();
        quotes.insert("bitcoin".into(), PriceQuote::new(dec!(42000)));
        quotes.insert("dogecoin".into(), PriceQuote::new(dec!(0.1)));

        assert_eq!(store.apply_prices(&quotes).await.unwrap(), 1);
        assert_eq!(store.get_price("bitcoin").await.unwrap().usd, dec!(42000));
        assert_eq!(store.price_count(), 1);
    }

    #[tokio::test]
    async fn test_top_by_market_cap() {
        let store = MemoryStore::new();
        for id in ["bitcoin", "ethereum", "solana"] {
            store.insert(coin(id)).await.unwrap();
        }

        let mut quotes = PriceQuotes::new();
        quotes.insert("bitcoin".into(), PriceQuote::new(dec!(1)).with_market_cap(dec!(800)));
        quotes.insert("ethereum".into(), PriceQuote::new(dec!(1)).with_market_cap(dec!(300)));
        quotes.insert("solana".into(), PriceQuote::new(dec!(1)));
        store.apply_prices(&quotes).await.unwrap();

        let top = store.top_by_market_cap(2).await.unwrap();
        let ids: Vec<&str> = top.iter().map(|(c, _)| c.coin_id.as_str()).collect();
        assert_eq!(ids, vec!["bitcoin", "ethereum"]);
    }
}
