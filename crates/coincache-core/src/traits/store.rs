//! Store trait definition.

use crate::error::StoreError;
use crate::types::{Coin, PriceQuotes, PriceRecord};
use async_trait::async_trait;

/// Trait for the system of record.
///
/// Stores hold coins and their price records with referential integrity:
/// a price record exists exactly when its coin does. Every mutating call
/// commits atomically on its own.
#[async_trait]
pub trait CoinStore: Send + Sync {
    /// Get a coin by id.
    async fn get(&self, coin_id: &str) -> Result<Coin, StoreError>;

    /// List coins ordered by id ascending.
    ///
    /// # Arguments
    /// * `offset` - Number of coins to skip
    /// * `limit` - Maximum number of coins to return
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Coin>, StoreError>;

    /// Total number of coins, for pagination.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Every tracked coin id, ordered ascending.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;

    /// Persist a new coin together with a placeholder price record.
    ///
    /// Fails with `AlreadyExists` when the id is taken.
    async fn insert(&self, coin: Coin) -> Result<Coin, StoreError>;

    /// Delete a coin and everything that depends on it.
    ///
    /// Fails with `NotFound` when the id is unknown.
    async fn delete(&self, coin_id: &str) -> Result<(), StoreError>;

    /// Get the price record for one coin.
    async fn get_price(&self, coin_id: &str) -> Result<PriceRecord, StoreError>;

    /// Get the price records that exist for the given ids, ordered by id.
    async fn get_prices(&self, coin_ids: &[String]) -> Result<Vec<PriceRecord>, StoreError>;

    /// Overwrite price records with upstream quotes.
    ///
    /// Ids without a price record are skipped.
    ///
    /// # Returns
    /// The number of records overwritten
    async fn apply_prices(&self, quotes: &PriceQuotes) -> Result<usize, StoreError>;

    /// Coins with their prices, largest market cap first.
    async fn top_by_market_cap(&self, limit: usize)
        -> Result<Vec<(Coin, PriceRecord)>, StoreError>;

    /// Check whether a coin exists.
    async fn exists(&self, coin_id: &str) -> Result<bool, StoreError> {
        match self.get(coin_id).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get the store name.
    fn name(&self) -> &str;
}
