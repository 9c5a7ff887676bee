//! Stateful session for interactive transactions.
//!
//! The [`Session`] wraps an [`Executor`] and remembers at most one open
//! interactive transaction. While it is open every request is routed
//! through it; otherwise requests run in their own implicit context.
//!
//! # Usage
//!
//! ```ignore
//! let mut session = executor.session();
//!
//! session.begin(None).await?;
//! session.execute(Request::new(insert_user)).await?;
//! let users = session.execute(Request::new(find_users)).await?;
//! session.commit().await?;
//! ```
//!
//! A session dropped with a transaction still open rolls it back in the
//! background.

use sluice_concurrency::TransactionOptions;
use sluice_core::{Error, Result, TransactionId, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::Executor;
use crate::request::Request;

/// A session holding an optional interactive transaction
pub struct Session {
    executor: Executor,
    txn: Option<TransactionId>,
}

impl Session {
    /// Create a session over `executor`
    pub fn new(executor: Executor) -> Self {
        Session { executor, txn: None }
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Id of the open transaction
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.txn
    }

    /// The underlying executor
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Open a transaction
    pub async fn begin(&mut self, options: Option<TransactionOptions>) -> Result<TransactionId> {
        if self.txn.is_some() {
            return Err(Error::TransactionAlreadyActive);
        }
        let id = self.executor.start_transaction(options).await?;
        self.txn = Some(id);
        Ok(id)
    }

    /// Execute a request, inside the open transaction if there is one
    pub async fn execute(&mut self, request: Request) -> Result<Value> {
        self.execute_with_cancel(request, self.executor.cancel_scope()).await
    }

    /// Execute a request observing `cancel`
    ///
    /// A failure inside the transaction rolls it back, after which the
    /// session no longer holds it.
    pub async fn execute_with_cancel(&mut self, mut request: Request, cancel: CancellationToken) -> Result<Value> {
        if let Some(id) = self.txn {
            request.transaction = Some(id);
        }
        let result = self.executor.execute_with_cancel(request, cancel).await;
        if let Some(id) = self.txn {
            if result.is_err() && !self.executor.transactions().is_open(id) {
                debug!(target: "sluice::txn", txn_id = %id, "Session transaction closed by failure");
                self.txn = None;
            }
        }
        result
    }

    /// Commit the open transaction
    pub async fn commit(&mut self) -> Result<()> {
        let id = self.take_open()?;
        self.executor.commit_transaction(id).await
    }

    /// Roll back the open transaction
    pub async fn rollback(&mut self) -> Result<()> {
        let id = self.take_open()?;
        self.executor.rollback_transaction(id).await
    }

    fn take_open(&mut self) -> Result<TransactionId> {
        self.txn
            .take()
            .ok_or_else(|| Error::internal("session has no open transaction"))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(id) = self.txn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let executor = self.executor.clone();
                handle.spawn(async move {
                    if let Err(e) = executor.rollback_transaction(id).await {
                        debug!(target: "sluice::txn", txn_id = %id, error = %e, "Dropped session rollback skipped");
                    }
                });
            }
            // The idle timeout reclaims it.
            Err(_) => debug!(target: "sluice::txn", txn_id = %id, "Session dropped outside a runtime"),
        }
    }
}
