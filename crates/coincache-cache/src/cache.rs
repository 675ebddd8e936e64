//! Best-effort cache facade.

use crate::backend::{CacheBackend, MemoryBackend};
use crate::keys::{CacheKey, Tag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// How often a fill also sweeps expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// A live entry was found and decoded
    Hit(T),
    /// No live entry
    Miss,
    /// The backend failed; the caller should go to the store
    Unavailable,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss | CacheLookup::Unavailable => None,
        }
    }
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub invalidations: u64,
    /// Keys currently registered in the tag index
    pub indexed_keys: usize,
}

/// Tag registrations plus the deadline of every registered key.
#[derive(Debug, Default)]
struct TagIndex {
    tags: HashMap<Tag, HashSet<String>>,
    deadlines: HashMap<String, Instant>,
    next_sweep: Option<Instant>,
}

impl TagIndex {
    fn register(&mut self, key: &str, tags: &[Tag], expires_at: Instant) {
        self.deadlines.insert(key.to_string(), expires_at);
        for tag in tags {
            self.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
    }

    /// Remove `tags` and return the keys registered under them.
    fn take(&mut self, tags: &[Tag]) -> Vec<String> {
        let mut keys: Vec<String> = tags
            .iter()
            .filter_map(|tag| self.tags.remove(tag))
            .flatten()
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    fn forget(&mut self, keys: &[String]) {
        let before = self.deadlines.len();
        for key in keys {
            self.deadlines.remove(key);
        }
        if self.deadlines.len() != before {
            self.drop_dead_registrations();
        }
    }

    /// Forget keys past their deadline, returning how many.
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.deadlines.len();
        self.deadlines.retain(|_, deadline| *deadline > now);
        let swept = before - self.deadlines.len();
        if swept > 0 {
            self.drop_dead_registrations();
        }
        swept
    }

    fn sweep_due(&mut self, now: Instant) -> bool {
        match self.next_sweep {
            Some(at) if at > now => false,
            Some(_) => {
                self.next_sweep = Some(now + SWEEP_INTERVAL);
                true
            }
            None => {
                self.next_sweep = Some(now + SWEEP_INTERVAL);
                false
            }
        }
    }

    fn drop_dead_registrations(&mut self) {
        let deadlines = &self.deadlines;
        self.tags.retain(|_, keys| {
            keys.retain(|key| deadlines.contains_key(key));
            !keys.is_empty()
        });
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    invalidations: AtomicU64,
}

/// TTL cache used strictly as an optimization.
///
/// No method returns an error: backend failures are logged and counted at
/// this boundary and callers fall back to the store. Registrations of
/// expired keys are swept periodically during fills and by
/// [`purge_expired`](Cache::purge_expired).
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    index: Mutex<TagIndex>,
    counters: Counters,
}

impl Cache {
    /// Create a cache over a backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            index: Mutex::new(TagIndex::default()),
            counters: Counters::default(),
        }
    }

    /// Create a cache over an in-process backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Look up and decode an entry.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheLookup<T> {
        match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(%key, "Cache hit");
                    CacheLookup::Hit(value)
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%key, error = %e, "Discarding undecodable cache entry");
                    self.delete_keys(vec![key.to_string()]).await;
                    CacheLookup::Miss
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "Cache miss");
                CacheLookup::Miss
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "Cache lookup failed, falling back to store");
                CacheLookup::Unavailable
            }
        }
    }

    /// Look up an entry, treating backend failure as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key).await.into_option()
    }

    /// Store a value under `key` and register it under `tags`.
    pub async fn put<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration, tags: &[Tag]) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "Could not serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.backend.set(key.as_str(), raw, ttl).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(%key, error = %e, "Cache write failed");
            return;
        }

        let now = Instant::now();
        let sweep = {
            let mut index = self.index();
            if !tags.is_empty() {
                index.register(key.as_str(), tags, now + ttl);
            }
            index.sweep_due(now)
        };
        trace!(%key, ttl_secs = ttl.as_secs(), "Cache fill");

        if sweep {
            self.purge_expired().await;
        }
    }

    /// Drop a single entry.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.delete_keys(vec![key.to_string()]).await;
    }

    /// Drop every entry registered under any of `tags`.
    pub async fn invalidate_tags(&self, tags: &[Tag]) {
        let keys = self.index().take(tags);
        if keys.is_empty() {
            return;
        }
        self.delete_keys(keys).await;
    }

    /// Drop expired entries from the backend and their tag registrations.
    pub async fn purge_expired(&self) {
        let swept = self.index().sweep(Instant::now());
        let purged = match self.backend.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache purge failed");
                0
            }
        };
        if swept > 0 || purged > 0 {
            debug!(swept, purged, "Purged expired cache entries");
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let indexed_keys = self.index().deadlines.len();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            indexed_keys,
        }
    }

    async fn delete_keys(&self, keys: Vec<String>) {
        self.index().forget(&keys);
        match self.backend.delete(&keys).await {
            Ok(removed) => {
                self.counters.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
                debug!(requested = keys.len(), removed, "Cache invalidation");
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(keys = keys.len(), error = %e, "Cache invalidation failed");
            }
        }
    }

    fn index(&self) -> MutexGuard<'_, TagIndex> {
        // The index only ever holds key names, so a poisoned lock is still usable.
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
