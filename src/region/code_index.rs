//! # Region Code Index
//!
//! Maps an area (district) code to its province, city and district names.
//!
//! The backing SQLite file holds three tables:
//!
//! | Table | Columns |
//! |-------|---------|
//! | `province` | `code`, `name` |
//! | `city` | `code`, `name`, `provinceCode` |
//! | `area` | `code`, `name`, `cityCode`, `provinceCode` |
//!
//! A lookup joins area → city → province on exact codes. The store is
//! read-only at runtime, so successful lookups are cached indefinitely.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::pool::ConnectionPool;

const LOOKUP_SQL: &str = "\
    SELECT province.name, city.name, area.name \
    FROM province, city, area \
    WHERE province.code = area.provinceCode \
      AND city.code = area.cityCode \
      AND area.code = ?1";

/// Administrative names for one area code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionNames {
    pub province: String,
    pub city: String,
    pub area: String,
}

/// Lookup cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Pooled, cached code → names lookup.
#[derive(Debug)]
pub struct RegionCodeIndex {
    pool: ConnectionPool,
    /// `None` when the cache capacity is 0
    cache: Option<Mutex<LruCache<String, RegionNames>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegionCodeIndex {
    /// Open the index read-only behind a pool built from `config`.
    pub fn open(path: impl AsRef<Path>, config: &PoolConfig, cache_capacity: usize) -> Result<Self> {
        let pool = ConnectionPool::open_read_only(path, config)?;
        Ok(Self::from_pool(pool, cache_capacity))
    }

    pub fn from_pool(pool: ConnectionPool, cache_capacity: usize) -> Self {
        Self {
            pool,
            cache: NonZeroUsize::new(cache_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create the three tables on a writable connection.
    ///
    /// Used when building an index file; lookups never write.
    pub fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS province (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS city (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provinceCode TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS area (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                cityCode TEXT NOT NULL,
                provinceCode TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Names for `code`, or `None` when the join yields no row.
    pub fn lookup(&self, code: &str) -> Result<Option<RegionNames>> {
        if let Some(hit) = self.cache_get(code) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(hit));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let conn = self.pool.acquire()?;
        let found = conn
            .prepare_cached(LOOKUP_SQL)?
            .query_row(params![code], |row| {
                Ok(RegionNames {
                    province: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    city: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    area: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })
            .optional()?;
        drop(conn);

        match &found {
            Some(names) => self.cache_put(code, names.clone()),
            None => debug!("[CodeIndex] No index row for code {}", code),
        }
        Ok(found)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn cache_stats(&self) -> CacheStats {
        let entries = match &self.cache {
            Some(cache) => match cache.lock() {
                Ok(cache) => cache.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            },
            None => 0,
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    fn cache_get(&self, code: &str) -> Option<RegionNames> {
        // A poisoned cache only costs a database round trip.
        self.cache.as_ref()?.lock().ok()?.get(code).cloned()
    }

    fn cache_put(&self, code: &str, names: RegionNames) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(|c| c.lock()) {
            cache.put(code.to_string(), names);
        }
    }
}
