//! Stores for coins and their prices.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use coincache_core::error::StoreError;
use std::path::Path;

/// Open the SQLite store at `path`, creating the schema if needed.
pub async fn open_sqlite(path: &Path) -> Result<SqliteStore, StoreError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || SqliteStore::open(&path))
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
}
