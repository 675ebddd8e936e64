//! Read-through access to coins and prices.
//!
//! [`CoinService`] serves reads from the cache when it can, falls back to
//! the store, and keeps cached views consistent with every write.

mod service;

pub use service::{validate_coin_id, CoinService, ServiceConfig};
