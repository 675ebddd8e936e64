//! Core data types for the coin cache.

mod coin;
mod price;
mod refresh;

pub use coin::{Coin, CoinProfile, CoinView};
pub use price::{PriceQuote, PriceQuotes, PriceRecord, PriceSummary};
pub use refresh::{RefreshOutcome, RefreshStatus};
