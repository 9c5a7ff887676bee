//! Transaction context
//!
//! A `TransactionContext` is one unit of work bound to one pooled
//! connection. It owns the connection for its whole life, so two contexts can
//! never share a connection.
//!
//! ## Kinds
//!
//! | Kind | BEGIN issued | Lifetime |
//! |------|--------------|----------|
//! | Implicit | only if a plan asks for a transaction scope | one request |
//! | Batch | when the batch has more than one statement | one batch |
//! | Interactive | always | until commit, rollback or idle timeout |
//!
//! ## State machine
//!
//! ```text
//! Idle -> Acquiring -> Active(kind) -> Committing -> Idle
//!                          |       \-> RollingBack -> Idle
//!                          \-> (nested scopes: savepoints, depth-tracked)
//! ```
//!
//! Commit and rollback consume the context; the connection goes back to the
//! pool when it drops. A failed commit attempts a rollback before reporting
//! the commit error. A failed rollback is logged and the connection is
//! discarded, but the slot is always freed.

use sluice_core::{Error, IsolationLevel, Result, TransactionId};
use sluice_driver::{Capabilities, NativeQuery, RawResultSet, TransactionToken};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::pool::PooledConnection;

/// How a transaction was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Auto-commit; one request
    Implicit,
    /// All statements of a batch
    Batch,
    /// Caller-driven, spanning several requests
    Interactive,
}

/// Lifecycle state of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No connection held
    Idle,
    /// Waiting for a pooled connection
    Acquiring,
    /// Connection held, statements may run
    Active(TransactionKind),
    /// COMMIT in flight
    Committing,
    /// ROLLBACK in flight
    RollingBack,
}

/// Options for an explicit transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level applied at BEGIN; backend default when unset
    pub isolation_level: Option<IsolationLevel>,
    /// How long to wait for a pooled connection
    pub max_wait: Duration,
    /// Idle time after which an interactive transaction is rolled back
    pub idle_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            isolation_level: None,
            max_wait: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// How a nested transaction scope was opened, and therefore how it closes
#[derive(Debug, PartialEq, Eq)]
pub enum NestedScope {
    /// The scope opened the connection's transaction
    Transaction,
    /// The scope is a savepoint inside an open transaction
    Savepoint(String),
    /// No transaction support; statements run inline
    Inline,
}

/// Check `level` against what the backend accepts
pub fn validate_isolation(capabilities: &Capabilities, level: Option<IsolationLevel>) -> Result<()> {
    match level {
        Some(level) if !capabilities.supports_isolation(level) => Err(Error::InvalidIsolationLevel {
            level: level.to_string(),
            provider: capabilities.provider.clone(),
        }),
        _ => Ok(()),
    }
}

/// One unit of work on one connection
pub struct TransactionContext {
    id: TransactionId,
    kind: TransactionKind,
    state: TransactionState,
    conn: PooledConnection,
    token: Option<TransactionToken>,
    isolation: Option<IsolationLevel>,
    savepoints: Vec<String>,
    next_savepoint: u32,
    started_at: Instant,
}

impl TransactionContext {
    /// Bind a context to `conn`
    ///
    /// The isolation level is validated before anything is sent. Interactive
    /// transactions issue BEGIN immediately; implicit and batch contexts
    /// start in auto-commit and are upgraded by [`Self::begin_nested`] or
    /// [`Self::begin_batch`].
    pub async fn begin(
        conn: PooledConnection,
        kind: TransactionKind,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self> {
        validate_isolation(conn.capabilities(), isolation)?;
        if conn.in_transaction() {
            return Err(Error::TransactionAlreadyActive);
        }
        let mut ctx = TransactionContext {
            id: TransactionId::new(),
            kind,
            state: TransactionState::Active(kind),
            conn,
            token: None,
            isolation,
            savepoints: Vec::new(),
            next_savepoint: 0,
            started_at: Instant::now(),
        };
        if kind == TransactionKind::Interactive {
            if !ctx.capabilities().supports_transactions {
                return Err(Error::internal(format!(
                    "{} does not support transactions",
                    ctx.capabilities().provider
                )));
            }
            ctx.open().await?;
        }
        debug!(target: "sluice::txn", txn_id = %ctx.id, ?kind, explicit = ctx.token.is_some(), "Transaction started");
        Ok(ctx)
    }

    /// Bind a batch context; BEGIN is issued when the batch has more than
    /// one statement and the backend supports transactions
    pub async fn begin_batch(
        conn: PooledConnection,
        statements: usize,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self> {
        let mut ctx = Self::begin(conn, TransactionKind::Batch, isolation).await?;
        if statements > 1 && ctx.capabilities().supports_transactions {
            ctx.open().await?;
        }
        Ok(ctx)
    }

    async fn open(&mut self) -> Result<()> {
        let isolation = self.isolation;
        let started = self.conn.connection()?.start_transaction(isolation).await;
        let token = started.map_err(|e| self.conn.translate(e))?;
        self.token = Some(token);
        self.conn.set_in_transaction(true);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Context id (the interactive transaction id for interactive contexts)
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Use a caller-visible id; interactive contexts are registered by id
    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = id;
        self
    }

    /// How the context was opened
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether BEGIN has been issued
    pub fn is_explicit(&self) -> bool {
        self.token.is_some()
    }

    /// Open savepoint depth
    pub fn depth(&self) -> usize {
        self.savepoints.len()
    }

    /// Backend capabilities
    pub fn capabilities(&self) -> &Capabilities {
        self.conn.capabilities()
    }

    /// Time since the context was bound
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active(_) => Ok(()),
            other => Err(Error::internal(format!(
                "transaction {} is not active: {other:?}",
                self.id
            ))),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Run a statement returning rows
    pub async fn query(&mut self, query: &NativeQuery) -> Result<RawResultSet> {
        self.ensure_active()?;
        let result = self.conn.connection()?.query_raw(query).await;
        result.map_err(|e| self.conn.translate(e))
    }

    /// Run a statement returning an affected-row count
    pub async fn execute(&mut self, query: &NativeQuery) -> Result<u64> {
        self.ensure_active()?;
        let result = self.conn.connection()?.execute_raw(query).await;
        result.map_err(|e| self.conn.translate(e))
    }

    /// Run several row-returning statements in one round trip
    ///
    /// Stops at the first failure; see `Queryable::query_batch`.
    pub async fn query_batch(&mut self, queries: &[NativeQuery]) -> Vec<Result<RawResultSet>> {
        if let Err(e) = self.ensure_active() {
            return vec![Err(e)];
        }
        let results = match self.conn.connection() {
            Ok(conn) => conn.query_batch(queries).await,
            Err(e) => return vec![Err(e)],
        };
        results
            .into_iter()
            .map(|r| r.map_err(|e| self.conn.translate(e)))
            .collect()
    }

    // =========================================================================
    // Nested scopes
    // =========================================================================

    /// Open a transaction scope inside this context
    ///
    /// Without an open transaction this issues BEGIN; inside one it creates
    /// a savepoint when the backend supports them and runs inline otherwise.
    pub async fn begin_nested(&mut self) -> Result<NestedScope> {
        self.ensure_active()?;
        if self.token.is_none() {
            if !self.capabilities().supports_transactions {
                return Ok(NestedScope::Inline);
            }
            self.open().await?;
            return Ok(NestedScope::Transaction);
        }
        if !self.capabilities().supports_savepoints {
            return Ok(NestedScope::Inline);
        }
        self.next_savepoint += 1;
        let name = format!("sluice_sp_{}", self.next_savepoint);
        let created = self.conn.connection()?.create_savepoint(&name).await;
        created.map_err(|e| self.conn.translate(e))?;
        self.savepoints.push(name.clone());
        debug!(target: "sluice::txn", txn_id = %self.id, savepoint = %name, depth = self.savepoints.len(), "Savepoint created");
        Ok(NestedScope::Savepoint(name))
    }

    /// Close a nested scope keeping its effects
    pub async fn commit_nested(&mut self, scope: NestedScope) -> Result<()> {
        match scope {
            NestedScope::Inline => Ok(()),
            NestedScope::Savepoint(name) => {
                self.pop_savepoint(&name)?;
                let released = self.conn.connection()?.release_savepoint(&name).await;
                released.map_err(|e| self.conn.translate(e))
            }
            NestedScope::Transaction => {
                let Some(token) = self.token.take() else {
                    return Err(Error::internal("nested transaction scope has no open transaction"));
                };
                let committed = self.conn.connection()?.commit(token).await;
                self.conn.set_in_transaction(false);
                committed.map_err(|e| self.conn.translate(e))
            }
        }
    }

    /// Close a nested scope discarding its effects
    ///
    /// Failures are logged; the original error that caused the rollback is
    /// what the caller reports.
    pub async fn rollback_nested(&mut self, scope: NestedScope) {
        match scope {
            NestedScope::Inline => {}
            NestedScope::Savepoint(name) => {
                if self.pop_savepoint(&name).is_err() {
                    return;
                }
                let conn = match self.conn.connection() {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut outcome = conn.rollback_to_savepoint(&name).await;
                if outcome.is_ok() {
                    outcome = conn.release_savepoint(&name).await;
                }
                if let Err(e) = outcome {
                    warn!(target: "sluice::txn", txn_id = %self.id, savepoint = %name, error = %e, "Savepoint rollback failed");
                    self.conn.mark_broken();
                }
            }
            NestedScope::Transaction => {
                if let Some(token) = self.token.take() {
                    self.rollback_token(token).await;
                }
            }
        }
    }

    fn pop_savepoint(&mut self, name: &str) -> Result<()> {
        match self.savepoints.last() {
            Some(top) if top == name => {
                self.savepoints.pop();
                Ok(())
            }
            _ => Err(Error::internal(format!(
                "savepoint {name} is not the innermost open scope"
            ))),
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Commit and release the connection
    ///
    /// On commit failure a rollback is attempted and the commit error is
    /// returned.
    pub async fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;
        let Some(token) = self.token.take() else {
            self.state = TransactionState::Idle;
            return Ok(());
        };
        let committed = self.conn.connection()?.commit(token).await;
        match committed {
            Ok(()) => {
                self.conn.set_in_transaction(false);
                self.state = TransactionState::Idle;
                debug!(target: "sluice::txn", txn_id = %self.id, kind = ?self.kind, elapsed_ms = self.elapsed().as_millis() as u64, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                let err = self.conn.translate(e);
                warn!(target: "sluice::txn", txn_id = %self.id, error = %err, "Commit failed, rolling back");
                self.rollback_open().await;
                Err(err)
            }
        }
    }

    /// Roll back and release the connection
    ///
    /// Never fails: a failed ROLLBACK is logged and the connection is
    /// discarded instead of being returned to the pool.
    pub async fn rollback(mut self) {
        self.state = TransactionState::RollingBack;
        if let Some(token) = self.token.take() {
            self.rollback_token(token).await;
        }
        self.state = TransactionState::Idle;
        debug!(target: "sluice::txn", txn_id = %self.id, kind = ?self.kind, "Transaction rolled back");
    }

    async fn rollback_open(&mut self) {
        // The driver consumed the token on the failed commit; ROLLBACK by hand.
        let sent = match self.conn.connection() {
            Ok(conn) => conn.execute_raw(&NativeQuery::new("ROLLBACK")).await.map(|_| ()),
            Err(_) => return,
        };
        match sent {
            Ok(()) => self.conn.set_in_transaction(false),
            Err(e) => {
                warn!(target: "sluice::txn", txn_id = %self.id, error = %e, "Rollback after failed commit failed");
                self.conn.mark_broken();
            }
        }
        self.state = TransactionState::Idle;
    }

    async fn rollback_token(&mut self, token: TransactionToken) {
        let rolled_back = match self.conn.connection() {
            Ok(conn) => conn.rollback(token).await,
            Err(_) => return,
        };
        match rolled_back {
            Ok(()) => self.conn.set_in_transaction(false),
            Err(e) => {
                warn!(target: "sluice::txn", txn_id = %self.id, error = %e, "Rollback failed; discarding connection");
                self.conn.mark_broken();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolConfig};
    use sluice_driver::{DriverError, ScriptedAdapter};
    use std::sync::Arc;

    fn pool(adapter: &ScriptedAdapter) -> Pool {
        Pool::new(Arc::new(adapter.clone()), PoolConfig::default())
    }

    #[tokio::test]
    async fn test_implicit_context_issues_no_begin() {
        let adapter = ScriptedAdapter::new();
        let pool = pool(&adapter);
        let mut ctx = TransactionContext::begin(pool.acquire().await.unwrap(), TransactionKind::Implicit, None)
            .await
            .unwrap();
        ctx.execute(&NativeQuery::new("UPDATE t SET x = 1")).await.unwrap();
        ctx.commit().await.unwrap();
        assert_eq!(adapter.statements(), vec!["UPDATE t SET x = 1".to_string()]);
    }

    #[tokio::test]
    async fn test_interactive_begin_and_commit() {
        let adapter = ScriptedAdapter::new();
        let pool = pool(&adapter);
        let ctx = TransactionContext::begin(
            pool.acquire().await.unwrap(),
            TransactionKind::Interactive,
            Some(IsolationLevel::ReadCommitted),
        )
        .await
        .unwrap();
        assert!(ctx.is_explicit());
        assert_eq!(ctx.state(), TransactionState::Active(TransactionKind::Interactive));
        ctx.commit().await.unwrap();
        assert_eq!(adapter.count_matching("BEGIN"), 1);
        assert_eq!(adapter.count_matching("COMMIT"), 1);
        // Clean connection went back to the pool.
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_unsupported_isolation_rejected_before_begin() {
        let adapter = ScriptedAdapter::new();
        let pool = pool(&adapter);
        let err = TransactionContext::begin(
            pool.acquire().await.unwrap(),
            TransactionKind::Interactive,
            Some(IsolationLevel::Snapshot),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidIsolationLevel { .. }));
        assert!(adapter.statements().is_empty());
    }

    #[tokio::test]
    async fn test_batch_of_one_stays_in_autocommit() {
        let adapter = ScriptedAdapter::new();
        let pool = pool(&adapter);
        let single = TransactionContext::begin_batch(pool.acquire().await.unwrap(), 1, None)
            .await
            .unwrap();
        assert!(!single.is_explicit());
        single.commit().await.unwrap();

        let many = TransactionContext::begin_batch(pool.acquire().await.unwrap(), 3, None)
            .await
            .unwrap();
        assert!(many.is_explicit());
        many.rollback().await;
        assert_eq!(adapter.count_matching("BEGIN"), 1);
        assert_eq!(adapter.count_matching("ROLLBACK"), 1);
    }

    #[tokio::test]
    async fn test_nested_scopes_use_savepoints() {
        let adapter = ScriptedAdapter::new();
        let pool = pool(&adapter);
        let mut ctx = TransactionContext::begin(pool.acquire().await.unwrap(), TransactionKind::Implicit, None)
            .await
            .unwrap();

        let outer = ctx.begin_nested().await.unwrap();
        assert_eq!(outer, NestedScope::Transaction);
        let inner = ctx.begin_nested().await.unwrap();
        assert_eq!(inner, NestedScope::Savepoint("sluice_sp_1".into()));
        assert_eq!(ctx.depth(), 1);
        ctx.rollback_nested(inner).await;
        ctx.commit_nested(outer).await.unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(
            adapter.statements(),
            vec![
                "BEGIN",
                "SAVEPOINT sluice_sp_1",
                "ROLLBACK TO SAVEPOINT sluice_sp_1",
                "RELEASE SAVEPOINT sluice_sp_1",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_scope_without_savepoints_runs_inline() {
        let adapter = ScriptedAdapter::new().configure(|c| c.supports_savepoints = false);
        let pool = pool(&adapter);
        let mut ctx = TransactionContext::begin(pool.acquire().await.unwrap(), TransactionKind::Interactive, None)
            .await
            .unwrap();
        assert_eq!(ctx.begin_nested().await.unwrap(), NestedScope::Inline);
        ctx.rollback().await;
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let adapter = ScriptedAdapter::new().fail_on("COMMIT", DriverError::new(Some("40001".into()), "could not serialize"));
        let pool = pool(&adapter);
        let ctx = TransactionContext::begin(pool.acquire().await.unwrap(), TransactionKind::Interactive, None)
            .await
            .unwrap();
        let err = ctx.commit().await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(adapter.count_matching("ROLLBACK"), 1);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_still_frees_slot() {
        let adapter = ScriptedAdapter::new().fail_on("ROLLBACK", DriverError::connection_closed("gone"));
        let pool = Pool::new(
            Arc::new(adapter.clone()),
            PoolConfig {
                max_connections: 1,
                acquire_timeout: Duration::from_millis(50),
            },
        );
        let ctx = TransactionContext::begin(pool.acquire().await.unwrap(), TransactionKind::Interactive, None)
            .await
            .unwrap();
        ctx.rollback().await;
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().idle, 0, "connection in unknown state is discarded");
        assert!(pool.acquire().await.is_ok());
    }
}
