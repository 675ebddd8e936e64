//! Core types and traits for the coin cache.
//!
//! This crate provides the foundational building blocks including:
//! - Reference data types (Coin, PriceRecord, CoinView)
//! - Upstream quote and profile types
//! - Refresh status shared between the engine and health reporting
//! - Core traits for stores and upstream price sources

pub mod types;
pub mod traits;
pub mod error;

pub use error::{ServiceError, ServiceResult};
pub use types::*;
pub use traits::*;
