//! Cache backends.

use async_trait::async_trait;
use coincache_core::error::CacheError;
use moka::Expiry;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Key-value storage with per-entry expiry.
///
/// Backends report failures; the [`Cache`](crate::Cache) facade decides
/// they never reach a caller.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live value, `None` on miss or after expiry.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Delete keys, returning how many were present.
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Drop expired entries, returning how many went.
    ///
    /// Backends that expire entries themselves keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    /// Get the backend name.
    fn name(&self) -> &str;
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

/// Hands each entry its own TTL so moka evicts it in the background.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process TTL cache backed by moka.
///
/// moka evicts on its own clock. Reads also check the entry deadline
/// against the tokio clock, so expiry follows paused time in tests.
pub struct MemoryBackend {
    entries: moka::future::Cache<String, Entry>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a backend holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryExpiry)
                .build(),
        }
    }

    /// Number of stored entries after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.entries.get(key).await {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value)),
            Some(_) => {
                self.entries.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in &expired {
            self.entries.invalidate(key.as_str()).await;
        }
        self.entries.run_pending_tasks().await;
        Ok(expired.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
