//! Upstream price sources.

mod coingecko;
mod fixed;

pub use coingecko::{CoinGeckoConfig, CoinGeckoSource};
pub use fixed::StaticSource;
