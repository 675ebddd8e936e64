//! Best-effort caching in front of the store.
//!
//! Entries expire purely by TTL. Invalidation goes through an explicit tag
//! index kept by [`Cache`], so it works the same on any backend.

mod backend;
mod cache;
mod keys;

pub use backend::{CacheBackend, MemoryBackend};
pub use cache::{Cache, CacheLookup, CacheStats};
pub use keys::{CacheKey, Tag};
