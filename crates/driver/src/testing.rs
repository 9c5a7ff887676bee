//! Scripted in-memory backend for tests
//!
//! `ScriptedAdapter` answers statements from canned rules matched by SQL
//! substring, records every statement it sees (including BEGIN / COMMIT /
//! ROLLBACK / savepoint control), and can inject failures, latency and
//! callbacks. Adapters are cheap clones sharing one script.
//!
//! ```ignore
//! let adapter = ScriptedAdapter::new()
//!     .on_query("FROM users", users_result())
//!     .fail_on("INSERT INTO audit", DriverError::new(Some("23505".into()), "dup"));
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_core::IsolationLevel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{Capabilities, Connection, DriverAdapter, Queryable, TransactionToken};
use crate::error::{DriverError, DriverResult};
use crate::native::{NativeQuery, RawResultSet};
use crate::translate::ErrorCodeTable;

type Hook = Arc<dyn Fn(&NativeQuery) + Send + Sync>;

enum Response {
    Rows(RawResultSet),
    Affected(u64),
    Fail(DriverError),
}

struct Rule {
    pattern: String,
    response: Response,
}

#[derive(Default)]
struct Script {
    rules: Mutex<Vec<Rule>>,
    hooks: Mutex<Vec<(String, Hook)>>,
    log: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    disposals: AtomicUsize,
}

/// Backend answering from a script
#[derive(Clone)]
pub struct ScriptedAdapter {
    script: Arc<Script>,
    capabilities: Capabilities,
    error_codes: ErrorCodeTable,
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAdapter {
    /// Adapter with transactions, savepoints and batching enabled
    pub fn new() -> Self {
        ScriptedAdapter {
            script: Arc::new(Script::default()),
            capabilities: Capabilities {
                provider: "scripted".to_string(),
                supports_transactions: true,
                supports_savepoints: true,
                supports_returning: true,
                supports_batching: true,
                max_bind_values: None,
                isolation_levels: vec![
                    IsolationLevel::ReadUncommitted,
                    IsolationLevel::ReadCommitted,
                    IsolationLevel::RepeatableRead,
                    IsolationLevel::Serializable,
                ],
            },
            error_codes: ErrorCodeTable::postgres(),
        }
    }

    /// Replace the advertised capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adjust the advertised capabilities in place
    pub fn configure(mut self, f: impl FnOnce(&mut Capabilities)) -> Self {
        f(&mut self.capabilities);
        self
    }

    /// Answer queries containing `pattern` with `rows`
    pub fn on_query(self, pattern: &str, rows: RawResultSet) -> Self {
        self.push(pattern, Response::Rows(rows));
        self
    }

    /// Answer executions containing `pattern` with an affected-row count
    pub fn on_execute(self, pattern: &str, count: u64) -> Self {
        self.push(pattern, Response::Affected(count));
        self
    }

    /// Fail statements containing `pattern`
    pub fn fail_on(self, pattern: &str, error: DriverError) -> Self {
        self.push(pattern, Response::Fail(error));
        self
    }

    /// Call `hook` whenever a statement containing `pattern` is dispatched
    pub fn hook(self, pattern: &str, hook: impl Fn(&NativeQuery) + Send + Sync + 'static) -> Self {
        self.script
            .hooks
            .lock()
            .push((pattern.to_string(), Arc::new(hook)));
        self
    }

    /// Delay every statement by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.script.latency.lock() = Some(latency);
        self
    }

    fn push(&self, pattern: &str, response: Response) {
        self.script.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            response,
        });
    }

    /// Every statement seen so far, in dispatch order
    pub fn statements(&self) -> Vec<String> {
        self.script.log.lock().clone()
    }

    /// How many dispatched statements contain `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.script
            .log
            .lock()
            .iter()
            .filter(|sql| sql.contains(pattern))
            .count()
    }

    /// Connections opened so far
    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Connections disposed so far
    pub fn disposals(&self) -> usize {
        self.script.disposals.load(Ordering::SeqCst)
    }
}

impl Script {
    async fn dispatch(&self, query: &NativeQuery) -> DriverResult<Option<Reply>> {
        self.log.lock().push(query.sql.clone());
        let hooks: Vec<Hook> = self
            .hooks
            .lock()
            .iter()
            .filter(|(pattern, _)| query.sql.contains(pattern.as_str()))
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(query);
        }
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let rules = self.rules.lock();
        let Some(rule) = rules.iter().find(|r| query.sql.contains(r.pattern.as_str())) else {
            return Ok(None);
        };
        match &rule.response {
            Response::Rows(rows) => Ok(Some(Reply::Rows(rows.clone()))),
            Response::Affected(n) => Ok(Some(Reply::Affected(*n))),
            Response::Fail(e) => Err(e.clone()),
        }
    }
}

enum Reply {
    Rows(RawResultSet),
    Affected(u64),
}

#[async_trait]
impl DriverAdapter for ScriptedAdapter {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn error_codes(&self) -> &ErrorCodeTable {
        &self.error_codes
    }

    async fn connect(&self) -> DriverResult<Box<dyn Connection>> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            next_serial: 0,
            open_serial: None,
            disposed: false,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
    next_serial: u64,
    open_serial: Option<u64>,
    disposed: bool,
}

impl ScriptedConnection {
    async fn send(&mut self, query: &NativeQuery) -> DriverResult<Option<Reply>> {
        if self.disposed {
            return Err(DriverError::connection_closed("connection has been disposed"));
        }
        self.script.dispatch(query).await
    }

    async fn control(&mut self, sql: &str) -> DriverResult<()> {
        self.send(&NativeQuery::new(sql)).await.map(|_| ())
    }
}

#[async_trait]
impl Queryable for ScriptedConnection {
    async fn query_raw(&mut self, query: &NativeQuery) -> DriverResult<RawResultSet> {
        Ok(match self.send(query).await? {
            Some(Reply::Rows(rows)) => rows,
            _ => RawResultSet::default(),
        })
    }

    async fn execute_raw(&mut self, query: &NativeQuery) -> DriverResult<u64> {
        Ok(match self.send(query).await? {
            Some(Reply::Affected(n)) => n,
            Some(Reply::Rows(rows)) => rows.rows.len() as u64,
            None => 0,
        })
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn start_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> DriverResult<TransactionToken> {
        if let Some(level) = isolation {
            self.control(&format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))
                .await?;
        }
        self.control("BEGIN").await?;
        self.next_serial += 1;
        self.open_serial = Some(self.next_serial);
        Ok(TransactionToken::new(self.next_serial))
    }

    async fn commit(&mut self, token: TransactionToken) -> DriverResult<()> {
        if self.open_serial.take() != Some(token.serial()) {
            return Err(DriverError::new(None, "unknown transaction token"));
        }
        self.control("COMMIT").await
    }

    async fn rollback(&mut self, token: TransactionToken) -> DriverResult<()> {
        if self.open_serial.take() != Some(token.serial()) {
            return Err(DriverError::new(None, "unknown transaction token"));
        }
        self.control("ROLLBACK").await
    }

    async fn dispose(&mut self) -> DriverResult<()> {
        if !self.disposed {
            self.disposed = true;
            self.script.disposals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
