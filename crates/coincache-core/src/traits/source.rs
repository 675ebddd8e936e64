//! Upstream price source trait definition.

use crate::error::UpstreamError;
use crate::types::{CoinProfile, PriceQuotes};
use async_trait::async_trait;

/// Trait for upstream price and metadata providers.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch current prices for a batch of coins in one call.
    ///
    /// # Arguments
    /// * `coin_ids` - Coins to quote
    ///
    /// # Returns
    /// Quotes keyed by coin id. Ids upstream does not know are omitted
    /// rather than reported as errors.
    async fn batch_price(&self, coin_ids: &[String]) -> Result<PriceQuotes, UpstreamError>;

    /// Look up a coin's profile. Used only when a coin is created.
    ///
    /// Fails with `NotFound` when upstream does not recognise the id.
    async fn lookup_metadata(&self, coin_id: &str) -> Result<CoinProfile, UpstreamError>;

    /// Get the source name.
    fn name(&self) -> &str;
}
