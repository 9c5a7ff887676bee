//! Shared helpers for the executor suite.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use sluice::{Arg, Executor, PlanNode, PoolConfig, Request, TransactionOptions, Value};
use sluice_driver::{ConnectionConfig, SqliteAdapter};

static TRACING: Once = Once::new();

/// Route engine logs to the test writer; `RUST_LOG`-style filtering is not needed here
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Executor over a private in-memory database
pub fn memory_executor() -> Executor {
    init_tracing();
    let adapter = SqliteAdapter::in_memory().expect("in-memory sqlite");
    Executor::new(Arc::new(adapter), pool(4), TransactionOptions::default())
}

/// Executor over a database file, for tests with concurrent writers
pub fn file_executor(path: &Path) -> Executor {
    init_tracing();
    let config = ConnectionConfig {
        url: format!("sqlite:{}", path.display()),
        statement_timeout: Some(Duration::from_secs(5)),
    };
    let adapter = SqliteAdapter::new(&config).expect("file sqlite");
    Executor::new(Arc::new(adapter), pool(4), TransactionOptions::default())
}

pub fn pool(max_connections: usize) -> PoolConfig {
    PoolConfig {
        max_connections,
        acquire_timeout: Duration::from_secs(2),
    }
}

/// Run DDL or DML with literal arguments
pub async fn exec(executor: &Executor, sql: &str, args: Vec<Value>) -> Value {
    executor
        .execute(Request::new(PlanNode::raw_execute(sql, args.into_iter().map(Arg::Literal).collect())))
        .await
        .expect(sql)
}

/// Run a query with literal arguments and return its rows
pub async fn query(executor: &Executor, sql: &str, args: Vec<Value>) -> Vec<Value> {
    executor
        .execute(Request::new(PlanNode::raw_query(sql, args.into_iter().map(Arg::Literal).collect())))
        .await
        .expect(sql)
        .as_list()
        .expect("rows")
        .to_vec()
}

pub fn field<'a>(row: &'a Value, name: &str) -> &'a Value {
    &row.as_record().expect("record")[name]
}

pub async fn create_accounts(executor: &Executor) {
    exec(
        executor,
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
        vec![],
    )
    .await;
}
