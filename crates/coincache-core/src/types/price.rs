//! Price types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest known market snapshot for a coin, in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Coin identifier (one record per coin)
    pub coin_id: String,
    /// Price in USD, never negative
    pub usd: Decimal,
    /// Market capitalization
    pub usd_market_cap: Option<Decimal>,
    /// 24-hour traded volume
    pub usd_24h_vol: Option<Decimal>,
    /// 24-hour change in percent (signed)
    pub usd_24h_change: Option<Decimal>,
    /// Observation time reported by upstream
    pub last_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceRecord {
    /// Zero-valued record written alongside a newly created coin.
    pub fn placeholder(coin_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            coin_id: coin_id.into(),
            usd: Decimal::ZERO,
            usd_market_cap: Some(Decimal::ZERO),
            usd_24h_vol: Some(Decimal::ZERO),
            usd_24h_change: Some(Decimal::ZERO),
            last_updated_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite market fields with an upstream quote.
    ///
    /// Upstream values are full snapshots, so every field is replaced. The
    /// observation time comes from the quote; when upstream omits it the
    /// previous observation time is kept.
    pub fn apply(&mut self, quote: &PriceQuote, now: DateTime<Utc>) {
        self.usd = quote.usd;
        self.usd_market_cap = quote.usd_market_cap;
        self.usd_24h_vol = quote.usd_24h_vol;
        self.usd_24h_change = quote.usd_24h_change;
        if let Some(observed) = quote.last_updated_at {
            self.last_updated_at = observed;
        }
        self.updated_at = now;
    }
}

/// One coin's entry in an upstream batch price response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub usd: Decimal,
    pub usd_market_cap: Option<Decimal>,
    pub usd_24h_vol: Option<Decimal>,
    pub usd_24h_change: Option<Decimal>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    /// Quote with only a price, mostly useful for stubs.
    pub fn new(usd: Decimal) -> Self {
        Self {
            usd,
            usd_market_cap: None,
            usd_24h_vol: None,
            usd_24h_change: None,
            last_updated_at: None,
        }
    }

    pub fn with_market_cap(mut self, market_cap: Decimal) -> Self {
        self.usd_market_cap = Some(market_cap);
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated_at = Some(at);
        self
    }
}

/// Batch price response keyed by coin id. Ids unknown upstream are absent.
pub type PriceQuotes = HashMap<String, PriceQuote>;

/// Price fields embedded in a coin list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub usd: Decimal,
    pub usd_market_cap: Option<Decimal>,
    pub usd_24h_vol: Option<Decimal>,
    pub usd_24h_change: Option<Decimal>,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&PriceRecord> for PriceSummary {
    fn from(record: &PriceRecord) -> Self {
        Self {
            usd: record.usd,
            usd_market_cap: record.usd_market_cap,
            usd_24h_vol: record.usd_24h_vol,
            usd_24h_change: record.usd_24h_change,
            last_updated_at: record.last_updated_at,
        }
    }
}
