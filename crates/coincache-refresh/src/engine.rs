//! Background refresh loop.
//!
//! Every cycle refreshes the price of every stored coin with one batched
//! upstream call, then sleeps for the configured interval. A failed cycle
//! is logged, recorded in the published [`RefreshStatus`], and retried
//! after a short backoff; the loop only ends when its handle is shut down.

use crate::updater::PriceUpdater;
use chrono::Utc;
use coincache_core::error::ServiceResult;
use coincache_core::types::{RefreshOutcome, RefreshStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Refresh loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Sleep after a successful cycle
    pub interval: Duration,
    /// Sleep after a failed cycle
    pub backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            backoff: Duration::from_secs(5),
        }
    }
}

/// Handle to a running refresh loop.
///
/// Clones share the same task; shutting down any clone stops it.
#[derive(Clone)]
pub struct RefreshHandle {
    token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RefreshHandle {
    /// Whether the loop task is still alive.
    pub fn is_running(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        lock(&self.task)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Token cancelled when the loop is asked to stop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether two handles refer to the same loop.
    pub fn same_loop(&self, other: &RefreshHandle) -> bool {
        Arc::ptr_eq(&self.task, &other.task)
    }

    /// Signal the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the loop and wait for the task to exit.
    ///
    /// An in-flight cycle is abandoned at its next await point.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Refresh task ended abnormally");
            }
        }
    }
}

/// Periodic price refresher.
pub struct RefreshEngine {
    updater: Arc<PriceUpdater>,
    config: RefreshConfig,
    status: watch::Sender<RefreshStatus>,
    handle: Mutex<Option<RefreshHandle>>,
}

impl RefreshEngine {
    pub fn new(updater: Arc<PriceUpdater>, config: RefreshConfig) -> Self {
        let (status, _) = watch::channel(RefreshStatus::default());
        Self {
            updater,
            config,
            status,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> RefreshConfig {
        self.config
    }

    /// Snapshot of the refresh status.
    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.status.subscribe()
    }

    /// Run one refresh cycle over every stored coin.
    pub async fn run_cycle(&self) -> ServiceResult<RefreshOutcome> {
        let result = self.refresh_all().await;
        self.updater.cache().purge_expired().await;
        let now = Utc::now();

        match &result {
            Ok(outcome) => {
                if outcome.missing() > 0 {
                    warn!(
                        missing = outcome.missing(),
                        requested = outcome.requested,
                        "Upstream omitted some coins; their prices keep previous values"
                    );
                }
                info!(
                    requested = outcome.requested,
                    updated = outcome.updated,
                    "Refresh cycle complete"
                );
                self.status
                    .send_modify(|status| status.record_success(outcome.clone(), now));
            }
            Err(e) => {
                self.status
                    .send_modify(|status| status.record_failure(e.to_string(), now));
            }
        }
        result
    }

    async fn refresh_all(&self) -> ServiceResult<RefreshOutcome> {
        let ids = self.updater.store().ids().await?;
        if ids.is_empty() {
            debug!("No coins stored, skipping upstream call");
            return Ok(RefreshOutcome::default());
        }
        self.updater.update(&ids).await
    }

    /// Start the loop, or return the handle of the loop already running.
    pub fn start(self: &Arc<Self>) -> RefreshHandle {
        let mut slot = lock(&self.handle);
        if let Some(existing) = slot.as_ref() {
            if existing.is_running() {
                debug!("Refresh loop already running");
                return existing.clone();
            }
        }

        let token = CancellationToken::new();
        let engine = Arc::clone(self);
        let task = tokio::spawn(engine.run(token.clone()));
        let handle = RefreshHandle {
            token,
            task: Arc::new(Mutex::new(Some(task))),
        };
        *slot = Some(handle.clone());

        info!(
            interval_secs = self.config.interval.as_secs(),
            backoff_secs = self.config.backoff.as_secs(),
            "Refresh loop started"
        );
        handle
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            let delay = tokio::select! {
                _ = token.cancelled() => break,
                result = self.run_cycle() => match result {
                    Ok(_) => self.config.interval,
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_in_secs = self.config.backoff.as_secs(),
                            "Refresh cycle failed"
                        );
                        self.config.backoff
                    }
                },
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Refresh loop stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coincache_cache::Cache;
    use coincache_core::traits::CoinStore;
    use coincache_core::types::{Coin, CoinProfile, PriceQuote};
    use coincache_store::MemoryStore;
    use coincache_upstream::StaticSource;
    use rust_decimal_macros::dec;
    use tokio::time::Instant;

    async fn engine_with(ids: &[&str], source: &StaticSource) -> (Arc<RefreshEngine>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            let profile = CoinProfile {
                coin_id: id.to_string(),
                symbol: id.to_string(),
                name: id.to_string(),
                metadata: None,
            };
            store.insert(Coin::from_profile(profile, Utc::now())).await.unwrap();
        }
        let updater = PriceUpdater::new(
            store.clone(),
            Arc::new(source.clone()),
            Arc::new(Cache::in_memory()),
            Duration::from_secs(10),
        );
        let engine = RefreshEngine::new(Arc::new(updater), RefreshConfig::default());
        (Arc::new(engine), store)
    }

    async fn wait_for_calls(source: &StaticSource, count: usize) {
        while source.batch_call_count() < count {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn test_cycle_refreshes_every_stored_coin() {
        let source = StaticSource::new()
            .with_quote("bitcoin", PriceQuote::new(dec!(64000)))
            .with_quote("ethereum", PriceQuote::new(dec!(3100)));
        let (engine, store) = engine_with(&["bitcoin", "ethereum"], &source).await;

        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(outcome.updated, 2);
        assert_eq!(store.get_price("ethereum").await.unwrap().usd, dec!(3100));

        let status = engine.status();
        assert!(status.last_success.is_some());
        assert_eq!(status.cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_cycle_on_empty_store_skips_upstream() {
        let source = StaticSource::new();
        let (engine, _) = engine_with(&[], &source).await;

        assert_eq!(engine.run_cycle().await.unwrap(), RefreshOutcome::default());
        assert_eq!(source.batch_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_purges_expired_cache_entries() {
        use coincache_cache::{CacheKey, Tag};

        let source = StaticSource::new();
        let (engine, _) = engine_with(&[], &source).await;
        let cache = engine.updater.cache().clone();
        for limit in 1..=20 {
            cache
                .put(&CacheKey::top_coins(limit), &"[]", Duration::from_secs(300), &[Tag::CoinList])
                .await;
        }
        assert_eq!(cache.stats().indexed_keys, 20);

        tokio::time::advance(Duration::from_secs(301)).await;
        engine.run_cycle().await.unwrap();
        assert_eq!(cache.stats().indexed_keys, 0);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_recorded() {
        let source = StaticSource::new();
        source.fail_next(1);
        let (engine, _) = engine_with(&["bitcoin"], &source).await;

        assert!(engine.run_cycle().await.is_err());
        let status = engine.status();
        assert_eq!(status.cycles_failed, 1);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.is_some());
        assert!(status.last_success.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failure_and_backs_off() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(64000)));
        source.fail_next(1);
        let (engine, store) = engine_with(&["bitcoin"], &source).await;

        let started = Instant::now();
        let handle = engine.start();
        wait_for_calls(&source, 2).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(5), "retried after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(60), "retried after {:?}", elapsed);
        assert!(handle.is_running());

        // Let the second cycle finish writing
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get_price("bitcoin").await.unwrap().usd, dec!(64000));
        let status = engine.status();
        assert_eq!(status.cycles_failed, 1);
        assert_eq!(status.cycles_completed, 1);
        assert_eq!(status.consecutive_failures, 0);

        handle.shutdown().await;
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_waits_interval_between_cycles() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(1)));
        let (engine, _) = engine_with(&["bitcoin"], &source).await;

        let started = Instant::now();
        let handle = engine.start();
        wait_for_calls(&source, 2).await;

        assert!(started.elapsed() >= Duration::from_secs(60));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(1)));
        let (engine, _) = engine_with(&["bitcoin"], &source).await;

        let first = engine.start();
        let second = engine.start();
        assert!(first.same_loop(&second));

        wait_for_calls(&source, 1).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.batch_call_count(), 1);

        first.shutdown().await;
        assert!(!second.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_further_cycles() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(1)));
        let (engine, _) = engine_with(&["bitcoin"], &source).await;

        let handle = engine.start();
        wait_for_calls(&source, 1).await;
        handle.shutdown().await;

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.batch_call_count(), 1);

        // A stopped loop can be started again
        let restarted = engine.start();
        assert!(!restarted.same_loop(&handle));
        wait_for_calls(&source, 2).await;
        restarted.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_is_published() {
        let source = StaticSource::new().with_quote("bitcoin", PriceQuote::new(dec!(1)));
        let (engine, _) = engine_with(&["bitcoin"], &source).await;
        let mut status = engine.subscribe();

        engine.run_cycle().await.unwrap();
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().cycles_completed, 1);
    }
}
