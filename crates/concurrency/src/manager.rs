//! Interactive transaction manager
//!
//! Keeps the registry of open interactive transactions, keyed by
//! `TransactionId`. Each open transaction owns its `TransactionContext`
//! behind an async mutex, so operations on one transaction are serialized
//! while different transactions proceed independently.
//!
//! ## Lifecycle
//!
//! ```text
//! start() -> acquire connection (max_wait) -> BEGIN -> registered
//! lease() -> exclusive access to the context for one request
//! commit() / rollback() -> removed from registry -> recorded as closed
//! idle watcher -> no lease for idle_timeout -> ROLLBACK -> recorded TimedOut
//! ```
//!
//! The last `MAX_CLOSED_TRANSACTIONS` closed ids are remembered so that a
//! late operation reports *why* the transaction is gone (`TransactionClosed`)
//! rather than `TransactionNotFound`.

use dashmap::DashMap;
use parking_lot::Mutex;
use sluice_core::{ClosedReason, Error, Result, TransactionId};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::Pool;
use crate::transaction::{validate_isolation, TransactionContext, TransactionKind, TransactionOptions};

/// How many closed transaction ids are remembered
pub const MAX_CLOSED_TRANSACTIONS: usize = 100;

struct OpenTransaction {
    slot: Arc<AsyncMutex<Option<TransactionContext>>>,
    last_used: Mutex<Instant>,
    idle_timeout: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    pool: Pool,
    defaults: TransactionOptions,
    open: DashMap<TransactionId, Arc<OpenTransaction>>,
    closed: Mutex<VecDeque<(TransactionId, ClosedReason)>>,
}

impl ManagerInner {
    fn record_closed(&self, id: TransactionId, reason: ClosedReason) {
        let mut closed = self.closed.lock();
        closed.push_back((id, reason));
        while closed.len() > MAX_CLOSED_TRANSACTIONS {
            closed.pop_front();
        }
    }

    fn closed_error(&self, id: TransactionId, operation: &str) -> Error {
        let reason = self
            .closed
            .lock()
            .iter()
            .rev()
            .find(|(closed_id, _)| *closed_id == id)
            .map(|(_, reason)| *reason);
        match reason {
            Some(reason) => Error::TransactionClosed {
                id: id.to_string(),
                operation: operation.to_string(),
                reason,
            },
            None => Error::TransactionNotFound { id: id.to_string() },
        }
    }
}

/// Registry of open interactive transactions
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Create a manager drawing connections from `pool`
    pub fn new(pool: Pool, defaults: TransactionOptions) -> Self {
        TransactionManager {
            inner: Arc::new(ManagerInner {
                pool,
                defaults,
                open: DashMap::new(),
                closed: Mutex::new(VecDeque::with_capacity(MAX_CLOSED_TRANSACTIONS)),
            }),
        }
    }

    /// Options used when `start` is given none
    pub fn defaults(&self) -> &TransactionOptions {
        &self.inner.defaults
    }

    /// Number of open transactions
    pub fn open_count(&self) -> usize {
        self.inner.open.len()
    }

    /// Whether `id` is open
    pub fn is_open(&self, id: TransactionId) -> bool {
        self.inner.open.contains_key(&id)
    }

    /// Start an interactive transaction
    ///
    /// The isolation level is checked against the backend before a
    /// connection is taken; the checkout waits at most `max_wait`.
    pub async fn start(&self, options: Option<TransactionOptions>) -> Result<TransactionId> {
        let options = options.unwrap_or(self.inner.defaults);
        validate_isolation(self.inner.pool.capabilities(), options.isolation_level)?;
        let conn = self.inner.pool.acquire_within(options.max_wait).await?;
        let ctx = TransactionContext::begin(conn, TransactionKind::Interactive, options.isolation_level).await?;
        let id = ctx.id();

        let entry = Arc::new(OpenTransaction {
            slot: Arc::new(AsyncMutex::new(Some(ctx))),
            last_used: Mutex::new(Instant::now()),
            idle_timeout: options.idle_timeout,
            watcher: Mutex::new(None),
        });
        self.inner.open.insert(id, entry.clone());
        let watcher = tokio::spawn(watch_idle(Arc::downgrade(&self.inner), id, entry.clone()));
        *entry.watcher.lock() = Some(watcher);

        info!(
            target: "sluice::txn",
            txn_id = %id,
            isolation = ?options.isolation_level,
            idle_timeout_ms = options.idle_timeout.as_millis() as u64,
            "Interactive transaction started"
        );
        Ok(id)
    }

    /// Take exclusive use of an open transaction for one operation
    ///
    /// Waits while another operation holds it. The idle clock restarts when
    /// the lease is dropped.
    pub async fn lease(&self, id: TransactionId, operation: &str) -> Result<TransactionLease> {
        let entry = self
            .inner
            .open
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| self.inner.closed_error(id, operation))?;
        let guard = entry.slot.clone().lock_owned().await;
        let guard = OwnedMutexGuard::try_map(guard, |slot| slot.as_mut())
            .map_err(|_| self.inner.closed_error(id, operation))?;
        *entry.last_used.lock() = Instant::now();
        Ok(TransactionLease { guard, entry })
    }

    /// Commit an open transaction
    pub async fn commit(&self, id: TransactionId) -> Result<()> {
        let ctx = self.detach(id, "commit").await?;
        match ctx.commit().await {
            Ok(()) => {
                self.inner.record_closed(id, ClosedReason::Committed);
                info!(target: "sluice::txn", txn_id = %id, "Interactive transaction committed");
                Ok(())
            }
            Err(e) => {
                self.inner.record_closed(id, ClosedReason::RolledBack);
                Err(e)
            }
        }
    }

    /// Roll back an open transaction
    pub async fn rollback(&self, id: TransactionId) -> Result<()> {
        let ctx = self.detach(id, "rollback").await?;
        ctx.rollback().await;
        self.inner.record_closed(id, ClosedReason::RolledBack);
        info!(target: "sluice::txn", txn_id = %id, "Interactive transaction rolled back");
        Ok(())
    }

    /// Roll back every open transaction; returns how many were rolled back
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<TransactionId> = self.inner.open.iter().map(|e| *e.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if self.rollback(id).await.is_ok() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            warn!(target: "sluice::txn", cancelled, "Cancelled open transactions");
        }
        cancelled
    }

    async fn detach(&self, id: TransactionId, operation: &str) -> Result<TransactionContext> {
        let Some((_, entry)) = self.inner.open.remove(&id) else {
            return Err(self.inner.closed_error(id, operation));
        };
        let watcher = entry.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        // Waits for an in-flight lease to finish.
        let ctx = entry.slot.lock().await.take();
        ctx.ok_or_else(|| self.inner.closed_error(id, operation))
    }
}

async fn watch_idle(manager: Weak<ManagerInner>, id: TransactionId, entry: Arc<OpenTransaction>) {
    loop {
        let last_used = *entry.last_used.lock();
        tokio::time::sleep_until(tokio::time::Instant::from_std(last_used + entry.idle_timeout)).await;

        let mut slot = entry.slot.lock().await;
        let idle_for = entry.last_used.lock().elapsed();
        if idle_for < entry.idle_timeout {
            continue;
        }
        let Some(manager) = manager.upgrade() else {
            return;
        };
        // A concurrent commit or rollback owns the transaction now.
        if manager.open.remove(&id).is_none() {
            return;
        }
        let Some(ctx) = slot.take() else {
            return;
        };
        drop(slot);

        warn!(
            target: "sluice::txn",
            txn_id = %id,
            idle_ms = idle_for.as_millis() as u64,
            "Interactive transaction timed out; rolling back"
        );
        ctx.rollback().await;
        manager.record_closed(id, ClosedReason::TimedOut);
        debug!(target: "sluice::txn", txn_id = %id, "Timed-out transaction released");
        return;
    }
}

/// Exclusive access to an open transaction for one operation
pub struct TransactionLease {
    guard: OwnedMappedMutexGuard<Option<TransactionContext>, TransactionContext>,
    entry: Arc<OpenTransaction>,
}

impl Deref for TransactionLease {
    type Target = TransactionContext;

    fn deref(&self) -> &TransactionContext {
        &self.guard
    }
}

impl DerefMut for TransactionLease {
    fn deref_mut(&mut self) -> &mut TransactionContext {
        &mut self.guard
    }
}

impl Drop for TransactionLease {
    fn drop(&mut self) {
        *self.entry.last_used.lock() = Instant::now();
    }
}
