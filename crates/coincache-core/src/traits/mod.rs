//! Core traits for the coin cache.

mod source;
mod store;

pub use source::PriceSource;
pub use store::CoinStore;
