//! Coin reference data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PriceRecord, PriceSummary};

/// A tracked coin, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    /// Upstream identifier (e.g. "bitcoin"), immutable once created
    pub coin_id: String,
    /// Ticker symbol
    pub symbol: String,
    /// Display name
    pub name: String,
    /// Free-form metadata document from the upstream profile
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coin {
    /// Build a new coin from an upstream profile.
    pub fn from_profile(profile: CoinProfile, now: DateTime<Utc>) -> Self {
        Self {
            coin_id: profile.coin_id,
            symbol: profile.symbol,
            name: profile.name,
            metadata: profile.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Project into the externally visible shape.
    pub fn view(&self, include_metadata: bool) -> CoinView {
        CoinView {
            coin_id: self.coin_id.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: if include_metadata {
                self.metadata.clone()
            } else {
                None
            },
            price: None,
        }
    }
}

/// Coin profile returned by the upstream metadata lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinProfile {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub metadata: Option<serde_json::Value>,
}

/// Read view of a coin, optionally enriched with metadata and price.
///
/// This is the value snapshot stored in the cache, so its serialized form
/// is what repeated reads compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinView {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceSummary>,
}

impl CoinView {
    /// Attach a price snapshot.
    pub fn with_price(mut self, price: &PriceRecord) -> Self {
        self.price = Some(PriceSummary::from(price));
        self
    }
}
