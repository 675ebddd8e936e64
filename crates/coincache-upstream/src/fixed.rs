//! In-memory price source for simulation and tests.

use async_trait::async_trait;
use coincache_core::error::UpstreamError;
use coincache_core::traits::PriceSource;
use coincache_core::types::{CoinProfile, PriceQuote, PriceQuotes};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct SourceState {
    quotes: HashMap<String, PriceQuote>,
    profiles: HashMap<String, CoinProfile>,
    failures_remaining: usize,
    batch_calls: Vec<Vec<String>>,
    lookup_calls: usize,
}

/// Price source serving fixed quotes and profiles.
///
/// Failures can be injected for the next N batch calls, and every batch
/// request is recorded so callers can assert on upstream traffic.
#[derive(Clone, Default)]
pub struct StaticSource {
    state: Arc<Mutex<SourceState>>,
}

impl StaticSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coin profile served by `lookup_metadata`.
    pub fn with_profile(self, profile: CoinProfile) -> Self {
        self.set_profile(profile);
        self
    }

    /// Register a quote served by `batch_price`.
    pub fn with_quote(self, coin_id: &str, quote: PriceQuote) -> Self {
        self.set_quote(coin_id, quote);
        self
    }

    pub fn set_profile(&self, profile: CoinProfile) {
        self.lock().profiles.insert(profile.coin_id.clone(), profile);
    }

    pub fn set_quote(&self, coin_id: &str, quote: PriceQuote) {
        self.lock().quotes.insert(coin_id.to_string(), quote);
    }

    pub fn remove_quote(&self, coin_id: &str) {
        self.lock().quotes.remove(coin_id);
    }

    /// Make the next `count` batch calls fail as unreachable.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Id lists of every batch call so far, including failed ones.
    pub fn batch_calls(&self) -> Vec<Vec<String>> {
        self.lock().batch_calls.clone()
    }

    pub fn batch_call_count(&self) -> usize {
        self.lock().batch_calls.len()
    }

    pub fn lookup_call_count(&self) -> usize {
        self.lock().lookup_calls
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PriceSource for StaticSource {
    async fn batch_price(&self, coin_ids: &[String]) -> Result<PriceQuotes, UpstreamError> {
        let mut state = self.lock();
        state.batch_calls.push(coin_ids.to_vec());

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(UpstreamError::Connection("static source unreachable".into()));
        }

        Ok(coin_ids
            .iter()
            .filter_map(|id| state.quotes.get(id).map(|q| (id.clone(), q.clone())))
            .collect())
    }

    async fn lookup_metadata(&self, coin_id: &str) -> Result<CoinProfile, UpstreamError> {
        let mut state = self.lock();
        state.lookup_calls += 1;
        state
            .profiles
            .get(coin_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(coin_id.to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_omits_unknown_ids() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(60000)));

        let ids = vec!["bitcoin".to_string(), "ghost".to_string()];
        let quotes = source.batch_price(&ids).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes["bitcoin"].usd, dec!(60000));
        assert_eq!(source.batch_calls(), vec![ids]);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(1)));
        source.fail_next(1);

        let ids = vec!["bitcoin".to_string()];
        assert!(source.batch_price(&ids).await.is_err());
        assert!(source.batch_price(&ids).await.is_ok());
        assert_eq!(source.batch_call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let source = StaticSource::new();
        let err = source.lookup_metadata("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(source.lookup_call_count(), 1);
    }
}
