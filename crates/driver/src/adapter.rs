//! Driver adapter contract
//!
//! A backend plugs into the engine by implementing three traits:
//!
//! | Trait | Role |
//! |-------|------|
//! | `DriverAdapter` | Opens connections, reports capabilities and error codes |
//! | `Queryable` | Runs statements on a connection |
//! | `Connection` | Adds transaction control and disposal |
//!
//! Connections are used by one task at a time (`&mut self`); the pool hands
//! them out exclusively.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::IsolationLevel;
use std::time::Duration;

use crate::error::DriverResult;
use crate::native::{NativeQuery, RawResultSet};
use crate::translate::ErrorCodeTable;

/// What a backend supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Provider name (`sqlite`, `postgres`, ...)
    pub provider: String,
    /// BEGIN / COMMIT / ROLLBACK are available
    pub supports_transactions: bool,
    /// SAVEPOINT is available inside a transaction
    pub supports_savepoints: bool,
    /// INSERT ... RETURNING is available
    pub supports_returning: bool,
    /// Several statements can be sent in one round trip
    pub supports_batching: bool,
    /// Maximum bind parameters per statement, if limited
    pub max_bind_values: Option<usize>,
    /// Isolation levels accepted at BEGIN
    pub isolation_levels: Vec<IsolationLevel>,
}

impl Capabilities {
    /// Whether `level` may be requested at BEGIN
    pub fn supports_isolation(&self, level: IsolationLevel) -> bool {
        self.isolation_levels.contains(&level)
    }
}

/// Connection settings handed to an adapter when it is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Datasource URL
    pub url: String,
    /// Per-statement timeout, if the backend supports one
    pub statement_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Config for a URL with no statement timeout
    pub fn new(url: impl Into<String>) -> Self {
        ConnectionConfig {
            url: url.into(),
            statement_timeout: None,
        }
    }
}

/// Opaque handle for a transaction opened on a connection
///
/// Tokens are issued by `start_transaction` and consumed by `commit` or
/// `rollback`; a connection rejects tokens it did not issue.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TransactionToken {
    serial: u64,
}

impl TransactionToken {
    /// Token with the given serial; adapters number their transactions
    pub fn new(serial: u64) -> Self {
        TransactionToken { serial }
    }

    /// Serial this token was issued with
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// Statement execution
#[async_trait]
pub trait Queryable: Send {
    /// Run a statement and return its rows
    async fn query_raw(&mut self, query: &NativeQuery) -> DriverResult<RawResultSet>;

    /// Run a statement and return the number of affected rows
    async fn execute_raw(&mut self, query: &NativeQuery) -> DriverResult<u64>;

    /// Run several statements, ideally in one round trip
    ///
    /// Results are positional. Execution stops at the first failure, so the
    /// returned vector may be shorter than `queries`; its last element is
    /// then the error.
    async fn query_batch(&mut self, queries: &[NativeQuery]) -> Vec<DriverResult<RawResultSet>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let result = self.query_raw(query).await;
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }
}

/// A live backend connection
#[async_trait]
pub trait Connection: Queryable {
    /// BEGIN a transaction, applying `isolation` if given
    async fn start_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> DriverResult<TransactionToken>;

    /// COMMIT the transaction identified by `token`
    async fn commit(&mut self, token: TransactionToken) -> DriverResult<()>;

    /// ROLLBACK the transaction identified by `token`
    async fn rollback(&mut self, token: TransactionToken) -> DriverResult<()>;

    /// Create a savepoint inside the open transaction
    async fn create_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute_raw(&NativeQuery::new(format!("SAVEPOINT {name}")))
            .await
            .map(|_| ())
    }

    /// Release (keep the effects of) a savepoint
    async fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute_raw(&NativeQuery::new(format!("RELEASE SAVEPOINT {name}")))
            .await
            .map(|_| ())
    }

    /// Undo everything since a savepoint
    async fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute_raw(&NativeQuery::new(format!("ROLLBACK TO SAVEPOINT {name}")))
            .await
            .map(|_| ())
    }

    /// Close the connection; any further use fails
    async fn dispose(&mut self) -> DriverResult<()>;
}

/// A database backend
#[async_trait]
pub trait DriverAdapter: Send + Sync + 'static {
    /// Backend capabilities
    fn capabilities(&self) -> &Capabilities;

    /// Vendor error codes for translation
    fn error_codes(&self) -> &ErrorCodeTable;

    /// Open a new connection
    async fn connect(&self) -> DriverResult<Box<dyn Connection>>;
}
