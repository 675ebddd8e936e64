//! Cache key derivation.

use serde::Serialize;
use std::fmt;

/// A cache key built from an operation name and its canonicalised options.
///
/// Equivalent requests always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Single coin read.
    pub fn coin(coin_id: &str, include_metadata: bool) -> Self {
        Self(format!("coin:{}:{}", coin_id, include_metadata))
    }

    /// Paginated coin list.
    pub fn coin_list(skip: usize, limit: usize, include_metadata: bool, include_prices: bool) -> Self {
        Self(format!(
            "coins:skip:{}:limit:{}:{}:{}",
            skip, limit, include_metadata, include_prices
        ))
    }

    /// Batch price read. Ids are sorted and deduplicated.
    pub fn prices(coin_ids: &[String]) -> Self {
        Self(format!("prices:{}", canonical_ids(coin_ids).join(",")))
    }

    /// Single price read.
    pub fn price(coin_id: &str) -> Self {
        Self(format!("price:{}", coin_id))
    }

    /// Top coins by market cap.
    pub fn top_coins(limit: usize) -> Self {
        Self(format!("top_coins:{}", limit))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort and deduplicate a list of coin ids.
fn canonical_ids(coin_ids: &[String]) -> Vec<&str> {
    let mut ids: Vec<&str> = coin_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Invalidation tag.
///
/// Every cached entry is registered under the tags of the data it was built
/// from; invalidating a tag drops exactly those entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Anything built from a coin's reference data
    Coin(String),
    /// Anything carrying a coin's price
    Price(String),
    /// Any paginated or aggregate list view
    CoinList,
}

impl Tag {
    pub fn coin(coin_id: impl Into<String>) -> Self {
        Tag::Coin(coin_id.into())
    }

    pub fn price(coin_id: impl Into<String>) -> Self {
        Tag::Price(coin_id.into())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Coin(id) => write!(f, "coin:{}", id),
            Tag::Price(id) => write!(f, "price:{}", id),
            Tag::CoinList => f.write_str("coin-list"),
        }
    }
}
