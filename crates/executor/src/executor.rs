//! The Executor - single entry point to the plan engine.
//!
//! The Executor owns the connection pool and the interactive transaction
//! registry. Every request is checked for unresolved placeholders before a
//! connection is touched, then evaluated either in its own implicit
//! context or inside the interactive transaction it names.

use std::sync::Arc;
use std::time::Instant;

use sluice_concurrency::{
    Pool, PoolConfig, PoolStatus, TransactionContext, TransactionKind, TransactionManager,
    TransactionOptions,
};
use sluice_core::{IsolationLevel, Result, TransactionId, Value};
use sluice_driver::{Capabilities, DriverAdapter};
use sluice_engine::{Environment, Interpreter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch;
#[cfg(feature = "sqlite")]
use crate::config::{ConfigError, EngineConfig};
use crate::request::{BatchOptions, Request};
use crate::session::Session;

struct Inner {
    pool: Pool,
    manager: TransactionManager,
    shutdown: CancellationToken,
}

/// Plan executor
///
/// Cheap to clone; clones share the pool and the transaction registry.
///
/// # Example
///
/// ```ignore
/// use sluice_executor::{Executor, Request};
/// use sluice_engine::{Arg, PlanNode};
///
/// let executor = Executor::from_config(&EngineConfig::default())?;
///
/// let users = executor
///     .execute(Request::new(PlanNode::raw_query(
///         "SELECT * FROM users WHERE id = ?",
///         vec![Arg::placeholder("id")],
///     )).param("id", 7i64))
///     .await?;
/// ```
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Executor over `adapter` with the given pool sizing and interactive
    /// transaction defaults
    pub fn new(adapter: Arc<dyn DriverAdapter>, pool: PoolConfig, transactions: TransactionOptions) -> Self {
        let pool = Pool::new(adapter, pool);
        let manager = TransactionManager::new(pool.clone(), transactions);
        Executor {
            inner: Arc::new(Inner {
                pool,
                manager,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Executor over `adapter` with default settings
    pub fn with_adapter(adapter: Arc<dyn DriverAdapter>) -> Self {
        Self::new(adapter, PoolConfig::default(), TransactionOptions::default())
    }

    /// Executor for a configured datasource
    ///
    /// Only SQLite URLs have a built-in adapter; other backends are plugged
    /// in through [`Executor::new`].
    #[cfg(feature = "sqlite")]
    pub fn from_config(config: &EngineConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let url = config.datasource.url.clone();
        if !is_sqlite_url(&url) {
            return Err(ConfigError::Datasource {
                url,
                reason: "no built-in adapter for this scheme".into(),
            });
        }
        let adapter = sluice_driver::SqliteAdapter::new(&config.connection_config())
            .map_err(|e| ConfigError::Datasource {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        info!(target: "sluice::pool", %url, max_connections = config.pool.max_connections, "Executor configured");
        Ok(Self::new(
            Arc::new(adapter),
            config.pool_config(),
            config.transaction_options()?,
        ))
    }

    /// Capabilities of the backend
    pub fn capabilities(&self) -> &Capabilities {
        self.inner.pool.capabilities()
    }

    /// The connection pool
    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    /// Pool counters
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// The interactive transaction registry
    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.manager
    }

    /// A session bound to this executor
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    pub(crate) fn cancel_scope(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    // =========================================================================
    // Single requests
    // =========================================================================

    /// Execute one request
    pub async fn execute(&self, request: Request) -> Result<Value> {
        self.execute_with_cancel(request, self.cancel_scope()).await
    }

    /// Execute one request, observing `cancel` before every statement
    pub async fn execute_with_cancel(&self, request: Request, cancel: CancellationToken) -> Result<Value> {
        request.check_bindings()?;
        match request.transaction {
            Some(id) => self.run_interactive(id, &request, cancel).await,
            None => self.run_implicit(&request, cancel).await,
        }
    }

    async fn run_implicit(&self, request: &Request, cancel: CancellationToken) -> Result<Value> {
        let started = Instant::now();
        let conn = self.inner.pool.acquire().await?;
        let mut ctx = TransactionContext::begin(conn, TransactionKind::Implicit, None).await?;
        let mut env = Environment::new(request.params.clone());
        let outcome = Interpreter::new(cancel).run(&request.plan, &mut env, &mut ctx).await;
        let txn_id = ctx.id();
        let result = match outcome {
            Ok(value) => ctx.commit().await.map(|()| value.materialize()),
            Err(e) => {
                ctx.rollback().await;
                Err(e)
            }
        };
        debug!(
            target: "sluice::query",
            %txn_id,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request finished"
        );
        result
    }

    async fn run_interactive(&self, id: TransactionId, request: &Request, cancel: CancellationToken) -> Result<Value> {
        let mut lease = self.inner.manager.lease(id, "execute").await?;
        let mut env = Environment::new(request.params.clone());
        let outcome = Interpreter::new(cancel).run(&request.plan, &mut env, &mut lease).await;
        drop(lease);
        match outcome {
            Ok(value) => Ok(value.materialize()),
            Err(e) => {
                warn!(target: "sluice::txn", txn_id = %id, error = %e, "Request failed, rolling back transaction");
                if let Err(rollback) = self.inner.manager.rollback(id).await {
                    debug!(target: "sluice::txn", txn_id = %id, error = %rollback, "Transaction already closed");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Execute several requests; one result per request, aligned by index
    ///
    /// Failures carry the index of the request that failed. Atomic batches
    /// run in one transaction and fail together; other batches may be
    /// grouped into one round trip or run concurrently.
    pub async fn execute_many(&self, requests: Vec<Request>, options: BatchOptions) -> Vec<Result<Value>> {
        batch::run(self, requests, options).await
    }

    /// Execute `requests` in one transaction, all or nothing
    pub async fn execute_transaction(
        &self,
        requests: Vec<Request>,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Vec<Value>> {
        batch::run_atomic(self, &requests, isolation_level, self.cancel_scope()).await
    }

    // =========================================================================
    // Interactive transactions
    // =========================================================================

    /// Open an interactive transaction; `None` uses the configured defaults
    pub async fn start_transaction(&self, options: Option<TransactionOptions>) -> Result<TransactionId> {
        self.inner.manager.start(options).await
    }

    /// Commit an interactive transaction
    pub async fn commit_transaction(&self, id: TransactionId) -> Result<()> {
        self.inner.manager.commit(id).await
    }

    /// Roll back an interactive transaction
    pub async fn rollback_transaction(&self, id: TransactionId) -> Result<()> {
        self.inner.manager.rollback(id).await
    }

    /// Cancel in-flight requests, roll back open transactions, close the pool
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let rolled_back = self.inner.manager.cancel_all().await;
        self.inner.pool.close().await;
        info!(target: "sluice::pool", rolled_back, "Executor shut down");
    }
}

#[cfg(feature = "sqlite")]
fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:") || url.starts_with("file:") || !url.contains("://")
}
