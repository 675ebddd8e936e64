//! SQLite-backed system of record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coincache_core::error::StoreError;
use coincache_core::traits::CoinStore;
use coincache_core::types::{Coin, PriceQuotes, PriceRecord};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS coins (
    coin_id TEXT PRIMARY KEY NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    coin_metadata TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS coin_prices (
    coin_id TEXT PRIMARY KEY NOT NULL REFERENCES coins(coin_id) ON DELETE CASCADE,
    usd TEXT NOT NULL,
    usd_market_cap TEXT,
    usd_24h_vol TEXT,
    usd_24h_change TEXT,
    last_updated_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const COIN_COLUMNS: &str = "c.coin_id, c.symbol, c.name, c.coin_metadata, c.created_at, c.updated_at";
const PRICE_COLUMNS: &str = "p.coin_id, p.usd, p.usd_market_cap, p.usd_24h_vol, p.usd_24h_change, \
     p.last_updated_at, p.created_at, p.updated_at";

/// Raw `coins` row before decoding.
struct CoinRow {
    coin_id: String,
    symbol: String,
    name: String,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl CoinRow {
    fn read(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            coin_id: row.get(base)?,
            symbol: row.get(base + 1)?,
            name: row.get(base + 2)?,
            metadata: row.get(base + 3)?,
            created_at: row.get(base + 4)?,
            updated_at: row.get(base + 5)?,
        })
    }

    fn decode(self) -> Result<Coin, StoreError> {
        let metadata = self
            .metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Coin {
            coin_id: self.coin_id,
            symbol: self.symbol,
            name: self.name,
            metadata,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

/// Raw `coin_prices` row before decoding.
struct PriceRow {
    coin_id: String,
    usd: String,
    usd_market_cap: Option<String>,
    usd_24h_vol: Option<String>,
    usd_24h_change: Option<String>,
    last_updated_at: i64,
    created_at: i64,
    updated_at: i64,
}

impl PriceRow {
    fn read(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            coin_id: row.get(base)?,
            usd: row.get(base + 1)?,
            usd_market_cap: row.get(base + 2)?,
            usd_24h_vol: row.get(base + 3)?,
            usd_24h_change: row.get(base + 4)?,
            last_updated_at: row.get(base + 5)?,
            created_at: row.get(base + 6)?,
            updated_at: row.get(base + 7)?,
        })
    }

    fn decode(self) -> Result<PriceRecord, StoreError> {
        Ok(PriceRecord {
            coin_id: self.coin_id,
            usd: parse_decimal(&self.usd)?,
            usd_market_cap: self.usd_market_cap.as_deref().map(parse_decimal).transpose()?,
            usd_24h_vol: self.usd_24h_vol.as_deref().map(parse_decimal).transpose()?,
            usd_24h_change: self.usd_24h_change.as_deref().map(parse_decimal).transpose()?,
            last_updated_at: from_millis(self.last_updated_at)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_decimal(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| StoreError::Serialization(format!("{}: {}", raw, e)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

/// SQLite store.
///
/// The connection sits behind a mutex and every query runs on the blocking
/// pool, so async callers never stall the runtime on disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        info!(path = %path.display(), "Opened SQLite store");
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Internal("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }
}

fn select_coin(conn: &Connection, coin_id: &str) -> Result<Option<Coin>, StoreError> {
    let sql = format!("SELECT {} FROM coins c WHERE c.coin_id = ?1", COIN_COLUMNS);
    conn.query_row(&sql, [coin_id], |row| CoinRow::read(row, 0))
        .optional()
        .map_err(db_err)?
        .map(CoinRow::decode)
        .transpose()
}

#[async_trait]
impl CoinStore for SqliteStore {
    async fn get(&self, coin_id: &str) -> Result<Coin, StoreError> {
        let id = coin_id.to_string();
        self.with_conn(move |conn| {
            select_coin(conn, &id)?.ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Coin>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM coins c ORDER BY c.coin_id ASC LIMIT ?1 OFFSET ?2",
                COIN_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params![sql_count(limit), sql_count(offset)], |row| CoinRow::read(row, 0))
                .map_err(db_err)?;

            let mut coins = Vec::new();
            for row in rows {
                coins.push(row.map_err(db_err)?.decode()?);
            }
            Ok(coins)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM coins", [], |row| row.get(0))
                .map_err(db_err)?;
            Ok(count as usize)
        })
        .await
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT coin_id FROM coins ORDER BY coin_id ASC")
                .map_err(db_err)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(db_err)?;
            Ok(ids)
        })
        .await
    }

    async fn insert(&self, coin: Coin) -> Result<Coin, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;

            if select_coin(&tx, &coin.coin_id)?.is_some() {
                return Err(StoreError::AlreadyExists(coin.coin_id));
            }

            let metadata = coin
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            tx.execute(
                "INSERT INTO coins (coin_id, symbol, name, coin_metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    coin.coin_id,
                    coin.symbol,
                    coin.name,
                    metadata,
                    coin.created_at.timestamp_millis(),
                    coin.updated_at.timestamp_millis(),
                ],
            )
            .map_err(db_err)?;

            let price = PriceRecord::placeholder(coin.coin_id.clone(), coin.created_at);
            tx.execute(
                "INSERT INTO coin_prices (coin_id, usd, usd_market_cap, usd_24h_vol, usd_24h_change,
                                          last_updated_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    price.coin_id,
                    price.usd.to_string(),
                    opt_text(price.usd_market_cap),
                    opt_text(price.usd_24h_vol),
                    opt_text(price.usd_24h_change),
                    price.last_updated_at.timestamp_millis(),
                    price.created_at.timestamp_millis(),
                    price.updated_at.timestamp_millis(),
                ],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;
            debug!(coin_id = %coin.coin_id, "Inserted coin");
            Ok(coin)
        })
        .await
    }

    async fn delete(&self, coin_id: &str) -> Result<(), StoreError> {
        let id = coin_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            // Cascade removes coin_prices; the explicit delete keeps this
            // correct even on a connection opened without foreign keys.
            tx.execute("DELETE FROM coin_prices WHERE coin_id = ?1", [&id])
                .map_err(db_err)?;
            let removed = tx
                .execute("DELETE FROM coins WHERE coin_id = ?1", [&id])
                .map_err(db_err)?;
            if removed == 0 {
                return Err(StoreError::NotFound(id));
            }
            tx.commit().map_err(db_err)?;
            debug!(coin_id = %id, "Deleted coin");
            Ok(())
        })
        .await
    }

    async fn get_price(&self, coin_id: &str) -> Result<PriceRecord, StoreError> {
        let id = coin_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM coin_prices p WHERE p.coin_id = ?1", PRICE_COLUMNS);
            conn.query_row(&sql, [&id], |row| PriceRow::read(row, 0))
                .optional()
                .map_err(db_err)?
                .ok_or(StoreError::NotFound(id))?
                .decode()
        })
        .await
    }

    async fn get_prices(&self, coin_ids: &[String]) -> Result<Vec<PriceRecord>, StoreError> {
        if coin_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = coin_ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT {} FROM coin_prices p WHERE p.coin_id IN ({}) ORDER BY p.coin_id ASC",
                PRICE_COLUMNS, placeholders
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), |row| PriceRow::read(row, 0))
                .map_err(db_err)?;

            let mut prices = Vec::new();
            for row in rows {
                prices.push(row.map_err(db_err)?.decode()?);
            }
            Ok(prices)
        })
        .await
    }

    async fn apply_prices(&self, quotes: &PriceQuotes) -> Result<usize, StoreError> {
        if quotes.is_empty() {
            return Ok(0);
        }

        let mut entries: Vec<_> = quotes
            .iter()
            .map(|(id, quote)| (id.clone(), quote.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let tx = conn.transaction().map_err(db_err)?;
            let mut updated = 0;
            {
                let mut stmt = tx
                    .prepare(
                        "UPDATE coin_prices
                         SET usd = ?2, usd_market_cap = ?3, usd_24h_vol = ?4, usd_24h_change = ?5,
                             last_updated_at = COALESCE(?6, last_updated_at), updated_at = ?7
                         WHERE coin_id = ?1",
                    )
                    .map_err(db_err)?;

                for (coin_id, quote) in &entries {
                    updated += stmt
                        .execute(params![
                            coin_id,
                            quote.usd.to_string(),
                            opt_text(quote.usd_market_cap),
                            opt_text(quote.usd_24h_vol),
                            opt_text(quote.usd_24h_change),
                            quote.last_updated_at.map(|t| t.timestamp_millis()),
                            now,
                        ])
                        .map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(updated)
        })
        .await
    }

    async fn top_by_market_cap(
        &self,
        limit: usize,
    ) -> Result<Vec<(Coin, PriceRecord)>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {}, {} FROM coins c
                 JOIN coin_prices p ON p.coin_id = c.coin_id
                 ORDER BY CAST(p.usd_market_cap AS REAL) DESC NULLS LAST, c.coin_id ASC
                 LIMIT ?1",
                COIN_COLUMNS, PRICE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map([sql_count(limit)], |row| {
                    Ok((CoinRow::read(row, 0)?, PriceRow::read(row, 6)?))
                })
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                let (coin, price) = row.map_err(db_err)?;
                out.push((coin.decode()?, price.decode()?));
            }
            Ok(out)
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// SQLite reads a negative LIMIT as unbounded and a negative OFFSET as zero.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use coincache_core::types::{CoinProfile, PriceQuote};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn coin(id: &str) -> Coin {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        Coin::from_profile(
            CoinProfile {
                coin_id: id.to_string(),
                symbol: id.chars().take(3).collect(),
                name: id.to_uppercase(),
                metadata: Some(json!({ "categories": ["Layer 1"], "links": { "homepage": [] } })),
            },
            now,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip_metadata() {
        let store = SqliteStore::open_in_memory().unwrap();
        let inserted = store.insert(coin("bitcoin")).await.unwrap();

        let loaded = store.get("bitcoin").await.unwrap();
        assert_eq!(loaded, inserted);
        assert_eq!(loaded.metadata.unwrap()["categories"][0], "Layer 1");

        let price = store.get_price("bitcoin").await.unwrap();
        assert_eq!(price.usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_insert_duplicate_keeps_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(coin("bitcoin")).await.unwrap();

        let err = store.insert(coin("bitcoin")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_price_and_reports_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(coin("bitcoin")).await.unwrap();

        store.delete("bitcoin").await.unwrap();
        assert!(store.get_price("bitcoin").await.unwrap_err().is_not_found());
        assert!(store.delete("bitcoin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["cardano", "bitcoin", "ethereum", "solana"] {
            store.insert(coin(id)).await.unwrap();
        }

        let page: Vec<String> = store
            .list(1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.coin_id)
            .collect();
        assert_eq!(page, vec!["cardano", "ethereum"]);
        assert_eq!(store.count().await.unwrap(), 4);
        assert_eq!(store.ids().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_oversized_paging_does_not_wrap() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["bitcoin", "ethereum", "solana"] {
            store.insert(coin(id)).await.unwrap();
        }

        assert!(store.list(usize::MAX, 2).await.unwrap().is_empty());
        assert_eq!(store.list(1, usize::MAX).await.unwrap().len(), 2);
        assert_eq!(store.top_by_market_cap(usize::MAX).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_apply_prices_overwrites_and_skips_unknown() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(coin("bitcoin")).await.unwrap();
        store.insert(coin("ethereum")).await.unwrap();

        let observed = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let mut quotes = PriceQuotes::new();
        quotes.insert(
            "bitcoin".into(),
            PriceQuote::new(dec!(61234.5678)).with_market_cap(dec!(1200000000000)).observed_at(observed),
        );
        quotes.insert("ghost".into(), PriceQuote::new(dec!(1)));

        assert_eq!(store.apply_prices(&quotes).await.unwrap(), 1);

        let btc = store.get_price("bitcoin").await.unwrap();
        assert_eq!(btc.usd, dec!(61234.5678));
        assert_eq!(btc.last_updated_at, observed);

        let eth = store.get_price("ethereum").await.unwrap();
        assert_eq!(eth.usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_get_prices_returns_existing_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(coin("bitcoin")).await.unwrap();
        store.insert(coin("ethereum")).await.unwrap();

        let ids = vec!["ethereum".to_string(), "ghost".to_string(), "bitcoin".to_string()];
        let prices = store.get_prices(&ids).await.unwrap();
        let found: Vec<&str> = prices.iter().map(|p| p.coin_id.as_str()).collect();
        assert_eq!(found, vec!["bitcoin", "ethereum"]);
    }

    #[tokio::test]
    async fn test_top_by_market_cap_orders_numerically() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["bitcoin", "ethereum", "solana"] {
            store.insert(coin(id)).await.unwrap();
        }

        // Text ordering would put "90" above "800"
        let mut quotes = PriceQuotes::new();
        quotes.insert("bitcoin".into(), PriceQuote::new(dec!(1)).with_market_cap(dec!(800)));
        quotes.insert("ethereum".into(), PriceQuote::new(dec!(1)).with_market_cap(dec!(90)));
        quotes.insert("solana".into(), PriceQuote::new(dec!(1)));
        store.apply_prices(&quotes).await.unwrap();

        let top = store.top_by_market_cap(3).await.unwrap();
        let ids: Vec<&str> = top.iter().map(|(c, _)| c.coin_id.as_str()).collect();
        assert_eq!(ids, vec!["bitcoin", "ethereum", "solana"]);
    }
}
