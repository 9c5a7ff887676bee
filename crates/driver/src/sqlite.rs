//! SQLite backend
//!
//! Built on `rusqlite`. Each connection owns a `rusqlite::Connection` behind
//! a mutex; every call runs on the blocking pool so the async runtime never
//! waits on SQLite's file locks.
//!
//! ## URLs
//!
//! | URL | Database |
//! |-----|----------|
//! | `sqlite::memory:` / `:memory:` | private shared-cache in-memory database |
//! | `sqlite:<path>` / `file:<path>` / `<path>` | file database in WAL mode |
//!
//! An in-memory database lives as long as its adapter: the adapter keeps
//! one connection open so pooled connections can come and go.
//!
//! ## Exact decimals
//!
//! A plain `DECIMAL` column has NUMERIC affinity and SQLite keeps only 15
//! significant digits of what it stores there. Declare exact decimal columns
//! with a TEXT-affinity name that still reads as decimal, such as
//! `DECIMAL_TEXT`; they decode as `Value::Decimal` with every digit intact.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::OpenFlags;
use sluice_core::{Column, ColumnType, DatabaseErrorKind, IsolationLevel, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::adapter::{Capabilities, Connection, ConnectionConfig, DriverAdapter, Queryable, TransactionToken};
use crate::error::{DriverError, DriverResult};
use crate::native::{NativeQuery, NativeValue, RawResultSet};
use crate::translate::ErrorCodeTable;

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER for older builds
const MAX_BIND_VALUES: usize = 999;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Target {
    Memory { uri: String },
    File(PathBuf),
}

/// SQLite driver adapter
pub struct SqliteAdapter {
    target: Target,
    busy_timeout: Duration,
    capabilities: Capabilities,
    error_codes: ErrorCodeTable,
    // Keeps a shared-cache in-memory database alive between checkouts.
    _keeper: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteAdapter {
    /// Create an adapter for the configured URL
    pub fn new(config: &ConnectionConfig) -> DriverResult<Self> {
        let target = parse_url(&config.url);
        let busy_timeout = config.statement_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT);
        let keeper = match &target {
            Target::Memory { uri } => Some(Mutex::new(open(&target, busy_timeout).map_err(|e| {
                DriverError::connection_closed(format!("cannot open {uri}: {}", e.message))
            })?)),
            Target::File(_) => None,
        };
        debug!(target: "sluice::pool", url = %config.url, "SQLite adapter created");
        Ok(SqliteAdapter {
            target,
            busy_timeout,
            capabilities: Capabilities {
                provider: "sqlite".to_string(),
                supports_transactions: true,
                supports_savepoints: true,
                supports_returning: true,
                supports_batching: true,
                max_bind_values: Some(MAX_BIND_VALUES),
                isolation_levels: vec![IsolationLevel::Serializable],
            },
            error_codes: ErrorCodeTable::sqlite(),
            _keeper: keeper,
        })
    }

    /// Adapter over a fresh private in-memory database
    pub fn in_memory() -> DriverResult<Self> {
        Self::new(&ConnectionConfig::new("sqlite::memory:"))
    }
}

fn parse_url(url: &str) -> Target {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .or_else(|| url.strip_prefix("file:"))
        .unwrap_or(url);
    if rest == ":memory:" || rest.is_empty() {
        Target::Memory {
            uri: format!("file:sluice-{}?mode=memory&cache=shared", uuid::Uuid::new_v4()),
        }
    } else {
        Target::File(PathBuf::from(rest))
    }
}

fn open(target: &Target, busy_timeout: Duration) -> DriverResult<rusqlite::Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match target {
        Target::Memory { uri } => rusqlite::Connection::open_with_flags(uri, flags),
        Target::File(path) => rusqlite::Connection::open_with_flags(path, flags),
    }
    .map_err(convert_error)?;
    conn.busy_timeout(busy_timeout).map_err(convert_error)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(convert_error)?;
    if matches!(target, Target::File(_)) {
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(convert_error)?;
    }
    Ok(conn)
}

#[async_trait]
impl DriverAdapter for SqliteAdapter {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn error_codes(&self) -> &ErrorCodeTable {
        &self.error_codes
    }

    async fn connect(&self) -> DriverResult<Box<dyn Connection>> {
        let target = self.target.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || open(&target, busy_timeout))
            .await
            .map_err(|e| DriverError::connection_closed(format!("sqlite open task failed: {e}")))??;
        Ok(Box::new(SqliteConnection {
            conn: Some(Arc::new(Mutex::new(conn))),
            next_serial: 0,
            open_serial: None,
        }))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One SQLite connection
pub struct SqliteConnection {
    conn: Option<Arc<Mutex<rusqlite::Connection>>>,
    next_serial: u64,
    open_serial: Option<u64>,
}

impl SqliteConnection {
    async fn run<T, F>(&self, f: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> DriverResult<T> + Send + 'static,
    {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| DriverError::connection_closed("connection has been disposed"))?;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| DriverError::fault(format!("sqlite worker failed: {e}")))?
    }

    async fn control(&self, sql: &'static str) -> DriverResult<()> {
        self.run(move |conn| conn.execute_batch(sql).map_err(convert_error))
            .await
    }

    fn take_token(&mut self, token: &TransactionToken) -> DriverResult<()> {
        match self.open_serial {
            Some(serial) if serial == token.serial() => {
                self.open_serial = None;
                Ok(())
            }
            _ => Err(DriverError::new(
                None,
                format!("transaction token {} is not open on this connection", token.serial()),
            )),
        }
    }
}

#[async_trait]
impl Queryable for SqliteConnection {
    async fn query_raw(&mut self, query: &NativeQuery) -> DriverResult<RawResultSet> {
        let query = query.clone();
        self.run(move |conn| run_query(conn, &query)).await
    }

    async fn execute_raw(&mut self, query: &NativeQuery) -> DriverResult<u64> {
        let query = query.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&query.sql).map_err(convert_error)?;
            let changed = stmt
                .execute(rusqlite::params_from_iter(query.args.iter().map(to_sql)))
                .map_err(convert_error)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn query_batch(&mut self, queries: &[NativeQuery]) -> Vec<DriverResult<RawResultSet>> {
        let queries = queries.to_vec();
        let outcome = self
            .run(move |conn| {
                let mut results = Vec::with_capacity(queries.len());
                for query in &queries {
                    let result = run_query(conn, query);
                    let failed = result.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                Ok(results)
            })
            .await;
        match outcome {
            Ok(results) => results,
            Err(e) => vec![Err(e)],
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn start_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> DriverResult<TransactionToken> {
        if self.open_serial.is_some() {
            return Err(DriverError::new(None, "cannot start a transaction within a transaction"));
        }
        // SQLite transactions are always serializable.
        if let Some(level) = isolation.filter(|l| *l != IsolationLevel::Serializable) {
            return Err(DriverError::new(
                None,
                format!("isolation level {level} is not supported"),
            ));
        }
        self.control("BEGIN").await?;
        self.next_serial += 1;
        self.open_serial = Some(self.next_serial);
        Ok(TransactionToken::new(self.next_serial))
    }

    async fn commit(&mut self, token: TransactionToken) -> DriverResult<()> {
        self.take_token(&token)?;
        self.control("COMMIT").await
    }

    async fn rollback(&mut self, token: TransactionToken) -> DriverResult<()> {
        self.take_token(&token)?;
        self.control("ROLLBACK").await
    }

    async fn dispose(&mut self) -> DriverResult<()> {
        self.open_serial = None;
        // Dropping the last handle closes the underlying connection.
        self.conn.take();
        Ok(())
    }
}

// ============================================================================
// Statement execution
// ============================================================================

fn run_query(conn: &mut rusqlite::Connection, query: &NativeQuery) -> DriverResult<RawResultSet> {
    let mut stmt = conn.prepare(&query.sql).map_err(convert_error)?;
    let mut columns: Vec<Column> = stmt
        .columns()
        .iter()
        .map(|c| Column::new(c.name(), column_type(c.decl_type())))
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    {
        let mut cursor = stmt
            .query(rusqlite::params_from_iter(query.args.iter().map(to_sql)))
            .map_err(convert_error)?;
        while let Some(row) = cursor.next().map_err(convert_error)? {
            let mut cells = Vec::with_capacity(width);
            for (i, col) in columns.iter().enumerate() {
                let cell = row.get_ref(i).map_err(convert_error)?;
                cells.push(from_sql(cell, &col.declared_type));
            }
            rows.push(cells);
        }
    }
    drop(stmt);

    // Expressions have no declared type; take it from the first value seen.
    for (i, col) in columns.iter_mut().enumerate() {
        if col.declared_type == ColumnType::Unknown {
            if let Some(found) = rows.iter().map(|r| &r[i]).find(|v| **v != NativeValue::Null) {
                col.declared_type = inferred_type(found);
            }
        }
    }

    let last_insert_id = is_insert(&query.sql)
        .then(|| conn.last_insert_rowid())
        .filter(|_| conn.changes() > 0)
        .map(|id| id.to_string());

    Ok(RawResultSet {
        columns,
        rows,
        last_insert_id,
    })
}

fn is_insert(sql: &str) -> bool {
    skip_leading_comments(sql)
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, after)| after);
        } else {
            return sql;
        }
    }
}

/// Map a declared column type using SQLite's affinity rules, refined for
/// the types the engine distinguishes
fn column_type(decl: Option<&str>) -> ColumnType {
    let Some(decl) = decl else {
        return ColumnType::Unknown;
    };
    let upper = decl.to_ascii_uppercase();
    let has = |needle: &str| upper.contains(needle);
    if has("BOOL") {
        ColumnType::Boolean
    } else if has("DATETIME") || has("TIMESTAMP") {
        ColumnType::DateTime
    } else if has("DATE") {
        ColumnType::Date
    } else if has("TIME") {
        ColumnType::Time
    } else if has("JSON") {
        ColumnType::Json
    } else if has("UUID") {
        ColumnType::Uuid
    } else if has("DEC") || has("NUMERIC") {
        ColumnType::Numeric
    } else if has("INT") {
        ColumnType::Int64
    } else if has("CHAR") || has("CLOB") || has("TEXT") {
        ColumnType::Text
    } else if has("BLOB") {
        ColumnType::Bytes
    } else if has("REAL") || has("FLOA") || has("DOUB") {
        ColumnType::Double
    } else {
        ColumnType::Unknown
    }
}

fn inferred_type(value: &NativeValue) -> ColumnType {
    match value {
        NativeValue::Int64(_) | NativeValue::Int32(_) => ColumnType::Int64,
        NativeValue::Double(_) => ColumnType::Double,
        NativeValue::Bytes(_) => ColumnType::Bytes,
        _ => ColumnType::Text,
    }
}

fn from_sql(cell: ValueRef<'_>, declared: &ColumnType) -> NativeValue {
    match cell {
        ValueRef::Null => NativeValue::Null,
        ValueRef::Integer(i) => match declared {
            ColumnType::Boolean => NativeValue::Bool(i != 0),
            _ => NativeValue::Int64(i),
        },
        ValueRef::Real(f) => NativeValue::Double(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match declared {
                ColumnType::Numeric => NativeValue::Numeric(text),
                ColumnType::Json => serde_json::from_str(&text)
                    .map(NativeValue::Json)
                    .unwrap_or(NativeValue::Text(text)),
                _ => NativeValue::Text(text),
            }
        }
        ValueRef::Blob(bytes) => NativeValue::Bytes(bytes.to_vec()),
    }
}

fn to_sql(value: &NativeValue) -> SqlValue {
    match value {
        NativeValue::Null => SqlValue::Null,
        NativeValue::Bool(b) => SqlValue::Integer(*b as i64),
        NativeValue::Int32(i) => SqlValue::Integer(*i as i64),
        NativeValue::Int64(i) => SqlValue::Integer(*i),
        NativeValue::Double(f) => SqlValue::Real(*f),
        NativeValue::Numeric(s) | NativeValue::Text(s) => SqlValue::Text(s.clone()),
        NativeValue::Bytes(b) => SqlValue::Blob(b.clone()),
        NativeValue::Json(v) => SqlValue::Text(v.to_string()),
        NativeValue::DateTime { secs, nanos } => SqlValue::Text(
            Timestamp::new(*secs, *nanos)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default(),
        ),
        // No array type; arrays are stored as JSON text.
        NativeValue::Array(_) => SqlValue::Text(value.to_json().to_string()),
    }
}

fn convert_error(err: rusqlite::Error) -> DriverError {
    if let rusqlite::Error::InvalidParameterCount(given, expected) = err {
        return DriverError::classified(
            DatabaseErrorKind::Query,
            format!("statement expects {expected} parameters, {given} given"),
        );
    }
    let code = err.sqlite_error().map(|failure| failure.extended_code.to_string());
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        other => other.to_string(),
    };
    DriverError::new(code, message)
}
