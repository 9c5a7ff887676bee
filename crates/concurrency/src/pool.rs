//! Connection pool
//!
//! A fixed number of slots guarded by a semaphore. Checking out a connection
//! takes a slot, reuses an idle connection when one exists and opens a new
//! one otherwise. Dropping the `PooledConnection` frees the slot and returns
//! a clean connection to the idle list.
//!
//! A connection dropped while a transaction is still open on it, or after
//! the backend reported it lost, is discarded rather than reused.

use parking_lot::Mutex;
use sluice_core::{DatabaseErrorKind, Error, Result};
use sluice_driver::{translate, Capabilities, Connection, DriverAdapter, DriverError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections checked out at once
    pub max_connections: usize,
    /// How long a checkout waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured maximum
    pub max_connections: usize,
    /// Connections currently checked out
    pub in_use: usize,
    /// Open connections waiting in the idle list
    pub idle: usize,
}

struct PoolInner {
    adapter: Arc<dyn DriverAdapter>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    config: PoolConfig,
}

/// Bounded pool of backend connections
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool over `adapter`; connections are opened lazily
    pub fn new(adapter: Arc<dyn DriverAdapter>, config: PoolConfig) -> Self {
        let slots = config.max_connections.max(1);
        Pool {
            inner: Arc::new(PoolInner {
                adapter,
                permits: Arc::new(Semaphore::new(slots)),
                idle: Mutex::new(Vec::with_capacity(slots)),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Backend capabilities
    pub fn capabilities(&self) -> &Capabilities {
        self.inner.adapter.capabilities()
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection, waiting at most the configured timeout
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_within(self.inner.config.acquire_timeout).await
    }

    /// Check out a connection, waiting at most `timeout` for a free slot
    pub async fn acquire_within(&self, timeout: Duration) -> Result<PooledConnection> {
        let permit = match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::internal("connection pool is closed")),
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(target: "sluice::pool", timeout_ms, in_use = self.inner.in_use.load(Ordering::Relaxed), "Connection pool exhausted");
                return Err(Error::PoolExhausted { timeout_ms });
            }
        };

        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let adapter = &self.inner.adapter;
                let conn = adapter
                    .connect()
                    .await
                    .map_err(|e| translate(e, adapter.error_codes()))?;
                debug!(target: "sluice::pool", provider = %adapter.capabilities().provider, "Opened connection");
                conn
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            conn: Some(conn),
            _permit: permit,
            pool: self.inner.clone(),
            in_transaction: false,
            broken: false,
        })
    }

    /// Current counters
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max_connections: self.inner.config.max_connections.max(1),
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
        }
    }

    /// Stop handing out connections and dispose the idle ones
    ///
    /// Connections still checked out are discarded when they come back.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.permits.close();
        let idle: Vec<_> = std::mem::take(&mut *self.inner.idle.lock());
        let count = idle.len();
        for mut conn in idle {
            if let Err(e) = conn.dispose().await {
                warn!(target: "sluice::pool", error = %e, "Failed to dispose idle connection");
            }
        }
        debug!(target: "sluice::pool", disposed = count, "Connection pool closed");
    }
}

/// A checked-out connection; returns to the pool on drop
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
    in_transaction: bool,
    broken: bool,
}

impl PooledConnection {
    /// The live connection
    pub fn connection(&mut self) -> Result<&mut (dyn Connection + 'static)> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::internal("pooled connection already released"))
    }

    /// Backend capabilities
    pub fn capabilities(&self) -> &Capabilities {
        self.pool.adapter.capabilities()
    }

    /// Translate a driver error, marking the connection unusable if it was lost
    pub fn translate(&mut self, err: DriverError) -> Error {
        let err = translate(err, self.pool.adapter.error_codes());
        if err.database_kind() == Some(DatabaseErrorKind::ConnectionLost) {
            self.broken = true;
        }
        err
    }

    /// Whether a transaction is open on this connection
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Record whether a transaction is open on this connection
    pub fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Discard this connection instead of reusing it
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || self.in_transaction || self.pool.closed.load(Ordering::SeqCst) {
            debug!(
                target: "sluice::pool",
                broken = self.broken,
                in_transaction = self.in_transaction,
                "Discarding connection"
            );
            discard(conn);
            return;
        }
        self.pool.idle.lock().push(conn);
    }
}

/// Dispose a connection that will not be reused
fn discard(mut conn: Box<dyn Connection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.dispose().await {
                    debug!(target: "sluice::pool", error = %e, "Discarded connection failed to dispose");
                }
            });
        }
        // Closing the handle is all that is left.
        Err(_) => drop(conn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_driver::{NativeQuery, ScriptedAdapter};
    use std::time::Instant;

    fn pool_of(adapter: ScriptedAdapter, size: usize, timeout_ms: u64) -> Pool {
        Pool::new(
            Arc::new(adapter),
            PoolConfig {
                max_connections: size,
                acquire_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_second_checkout_times_out_with_pool_of_one() {
        let pool = pool_of(ScriptedAdapter::new(), 1, 50);
        let held = pool.acquire().await.unwrap();

        let started = Instant::now();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, Error::PoolExhausted { timeout_ms: 50 }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(err.is_retryable());

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_checkout_proceeds_when_slot_frees() {
        let pool = pool_of(ScriptedAdapter::new(), 1, 1_000);
        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let adapter = ScriptedAdapter::new();
        let pool = pool_of(adapter.clone(), 2, 100);
        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(adapter.connects(), 1);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_dirty_and_broken_connections_are_discarded() {
        let adapter = ScriptedAdapter::new();
        let pool = pool_of(adapter.clone(), 2, 100);

        let mut dirty = pool.acquire().await.unwrap();
        dirty.set_in_transaction(true);
        drop(dirty);
        assert_eq!(pool.status().idle, 0);

        let mut lost = pool.acquire().await.unwrap();
        let err = lost.translate(DriverError::connection_closed("reset by peer"));
        assert!(err.is_retryable());
        drop(lost);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(adapter.connects(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(adapter.disposals(), 2);
    }

    #[tokio::test]
    async fn test_close_disposes_idle_and_rejects_checkout() {
        let adapter = ScriptedAdapter::new();
        let pool = pool_of(adapter.clone(), 2, 100);
        let mut conn = pool.acquire().await.unwrap();
        conn.connection()
            .unwrap()
            .execute_raw(&NativeQuery::new("SELECT 1"))
            .await
            .unwrap();
        drop(conn);

        pool.close().await;
        assert_eq!(adapter.disposals(), 1);
        assert!(matches!(pool.acquire().await, Err(Error::Internal { .. })));
    }
}
