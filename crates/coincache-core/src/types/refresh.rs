//! Refresh bookkeeping shared by the refresh engine and health reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one batched price update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    /// Distinct ids sent upstream
    pub requested: usize,
    /// Ids upstream returned a quote for
    pub quoted: usize,
    /// Price records actually overwritten
    pub updated: usize,
}

impl RefreshOutcome {
    /// Ids that upstream left out of its response.
    pub fn missing(&self) -> usize {
        self.requested.saturating_sub(self.quoted)
    }
}

/// Process-wide refresh state, published after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatus {
    /// Completion time of the last successful cycle
    pub last_success: Option<DateTime<Utc>>,
    /// Time the last cycle (successful or not) finished
    pub last_attempt: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Outcome of the last successful cycle
    pub last_outcome: Option<RefreshOutcome>,
}

impl RefreshStatus {
    pub fn record_success(&mut self, outcome: RefreshOutcome, at: DateTime<Utc>) {
        self.last_success = Some(at);
        self.last_attempt = Some(at);
        self.cycles_completed += 1;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_outcome = Some(outcome);
    }

    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.last_attempt = Some(at);
        self.cycles_failed += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
    }

    /// Seconds since the last successful cycle, if any.
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_success.map(|t| (now - t).num_seconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_failure_then_success_resets_streak() {
        let now = Utc::now();
        let mut status = RefreshStatus::default();

        status.record_failure("upstream down", now);
        status.record_failure("upstream down", now);
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_success.is_none());

        let outcome = RefreshOutcome { requested: 3, quoted: 2, updated: 2 };
        status.record_success(outcome.clone(), now);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.cycles_completed, 1);
        assert_eq!(status.cycles_failed, 2);
        assert!(status.last_error.is_none());
        assert_eq!(status.last_outcome.unwrap().missing(), 1);
    }

    #[test]
    fn test_age_secs() {
        let now = Utc::now();
        let mut status = RefreshStatus::default();
        assert_eq!(status.age_secs(now), None);

        status.record_success(RefreshOutcome::default(), now - Duration::seconds(90));
        assert_eq!(status.age_secs(now), Some(90));
    }
}
