//! # Connection Pool
//!
//! Bounded pool of read-only SQLite connections for the region code index,
//! built on `r2d2`.
//!
//! All `max_connections` connections are opened up front. When every one is
//! checked out, [`ConnectionPool::acquire`] either waits for one to come back
//! (optionally bounded by a wait timeout) or fails immediately with
//! [`EnrichError::PoolExhausted`] when the pool is non-blocking.
//!
//! Checked-out connections go back to the pool when the guard drops, so early
//! returns and `?` never leak a slot.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::config::PoolConfig;
use crate::error::{EnrichError, Result};

/// A connection checked out of a [`ConnectionPool`].
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// How long one wait lasts when the pool blocks without a timeout.
const WAIT_SLICE: Duration = Duration::from_secs(30);

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open (idle + checked out)
    pub open: usize,
    /// Open connections waiting in the pool
    pub idle: usize,
    /// Connections checked out right now
    pub in_use: usize,
}

/// A bounded pool of SQLite connections to a single database file.
pub struct ConnectionPool {
    inner: Pool<SqliteConnectionManager>,
    path: PathBuf,
    max_connections: usize,
    blocking: bool,
    wait_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("max_connections", &self.max_connections)
            .field("blocking", &self.blocking)
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool over `path` with explicit open flags.
    ///
    /// A missing or unreadable database fails here rather than on the first
    /// lookup.
    pub fn new(path: impl AsRef<Path>, flags: OpenFlags, config: &PoolConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(EnrichError::Config {
                key: "pool.max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let path = path.as_ref().to_path_buf();
        let open_error = |message: String| EnrichError::Persistence {
            message: format!("cannot open {}: {}", path.display(), message),
        };

        // r2d2 retries failed opens until its timeout; surface a bad path now.
        Connection::open_with_flags(&path, flags).map_err(|e| open_error(e.to_string()))?;

        let max_size = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
        let connection_timeout = config
            .wait_timeout()
            .filter(|t| !t.is_zero())
            .unwrap_or(WAIT_SLICE);
        let manager = SqliteConnectionManager::file(&path).with_flags(flags);
        let inner = Pool::builder()
            .max_size(max_size)
            .connection_timeout(connection_timeout)
            .build(manager)
            .map_err(|e| open_error(e.to_string()))?;

        debug!(
            "[ConnectionPool] Opened {} (max_connections={}, blocking={})",
            path.display(),
            config.max_connections,
            config.blocking
        );

        Ok(Self {
            inner,
            path,
            max_connections: config.max_connections,
            blocking: config.blocking,
            wait_timeout: config.wait_timeout(),
        })
    }

    /// Create a read-only pool. The code index is never written at runtime.
    pub fn open_read_only(path: impl AsRef<Path>, config: &PoolConfig) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Self::new(path, flags, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Check out a connection.
    ///
    /// Non-blocking pools fail with `PoolExhausted` when nothing is idle.
    /// Blocking pools wait, up to `wait_timeout` when one is configured.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();

        if !self.blocking {
            return self.inner.try_get().ok_or_else(|| self.exhausted(started));
        }

        match self.wait_timeout {
            Some(limit) => self.inner.get_timeout(limit).map_err(|e| {
                warn!(
                    "[ConnectionPool] Gave up after {}ms with {} connections in use: {}",
                    started.elapsed().as_millis(),
                    self.max_connections,
                    e
                );
                self.exhausted(started)
            }),
            None => loop {
                match self.inner.get_timeout(WAIT_SLICE) {
                    Ok(conn) => return Ok(conn),
                    Err(e) => warn!(
                        "[ConnectionPool] Still waiting for a connection after {}s: {}",
                        started.elapsed().as_secs(),
                        e
                    ),
                }
            },
        }
    }

    /// Run `f` with a checked-out connection.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.acquire()?;
        f(&conn)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        let open = state.connections as usize;
        let idle = state.idle_connections as usize;
        PoolStats {
            open,
            idle,
            in_use: open.saturating_sub(idle),
        }
    }

    fn exhausted(&self, started: Instant) -> EnrichError {
        EnrichError::PoolExhausted {
            max_connections: self.max_connections,
            waited_ms: started.elapsed().as_millis() as u64,
        }
    }
}
