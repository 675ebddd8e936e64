//! Health reporting.

use chrono::{DateTime, Utc};
use coincache_cache::CacheStats;
use coincache_core::types::RefreshStatus;
use serde::Serialize;
use std::time::Duration;

/// Coarse service state derived from refresh progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Prices were refreshed recently
    Healthy,
    /// The loop runs but has not finished a cycle yet
    Starting,
    /// The loop is not running; prices only move on demand
    Stopped,
    /// The last successful refresh is older than the staleness window
    Degraded,
}

/// How old the last refresh may get before the service counts as degraded.
///
/// Two missed intervals plus one backoff.
pub fn stale_after(interval: Duration, backoff: Duration) -> Duration {
    interval * 2 + backoff
}

/// Snapshot served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub refresh_running: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_age_secs: Option<i64>,
    pub stale_after_secs: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub cache: CacheStats,
}

impl HealthReport {
    pub fn new(
        refresh: &RefreshStatus,
        refresh_running: bool,
        cache: CacheStats,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let refresh_age_secs = refresh.age_secs(now);
        let fresh = refresh_age_secs
            .map(|age| (age as u64) <= stale_after.as_secs())
            .unwrap_or(false);

        let status = if fresh {
            HealthState::Healthy
        } else if !refresh_running {
            HealthState::Stopped
        } else if refresh.last_attempt.is_none() {
            HealthState::Starting
        } else {
            HealthState::Degraded
        };

        Self {
            status,
            refresh_running,
            last_refresh: refresh.last_success,
            refresh_age_secs,
            stale_after_secs: stale_after.as_secs(),
            cycles_completed: refresh.cycles_completed,
            cycles_failed: refresh.cycles_failed,
            consecutive_failures: refresh.consecutive_failures,
            last_error: refresh.last_error.clone(),
            cache,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status != HealthState::Degraded
    }
}
