//! # Sluice Executor
//!
//! The public API for running query plans against a database.
//!
//! This is the only crate users need to import. It provides:
//! - [`Executor`] - pool, transaction registry and request execution
//! - [`Session`] - a caller holding one interactive transaction
//! - [`Request`] / [`BatchOptions`] - what to run and how a batch is grouped
//! - [`EngineConfig`] - `sluice.toml` configuration
//!
//! ## Quick Start
//!
//! ```text
//! use sluice_executor::{EngineConfig, Executor, Request, PlanNode, Arg};
//!
//! let executor = Executor::from_config(&EngineConfig::default())?;
//! executor.execute(Request::new(PlanNode::raw_execute(
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![],
//! ))).await?;
//!
//! let rows = executor
//!     .execute(Request::new(PlanNode::raw_query(
//!         "SELECT * FROM users WHERE id = ?", vec![Arg::placeholder("id")],
//!     )).param("id", 1i64))
//!     .await?;
//! ```
//!
//! ## Transactions
//!
//! | Context | Opened by | Ends |
//! |---------|-----------|------|
//! | Implicit | `execute` | commit on success, rollback on error |
//! | Batch | `execute_many` / `execute_transaction` | first failure rolls back the batch |
//! | Interactive | `start_transaction` / `Session::begin` | explicit commit, rollback or idle timeout |

#![warn(missing_docs)]

mod batch;
mod config;
mod executor;
mod request;
mod session;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API - Everything users need is re-exported here
// =============================================================================

pub use batch::BatchMode;
pub use config::{
    ConfigError, DatasourceConfig, EngineConfig, PoolSettings, TransactionSettings, CONFIG_FILE_NAME,
};
pub use executor::Executor;
pub use request::{BatchOptions, Request};
pub use session::Session;

// Re-export the types requests and results are built from
pub use sluice_concurrency::{PoolConfig, PoolStatus, TransactionOptions};
pub use sluice_core::{
    ClosedReason, DatabaseError, DatabaseErrorKind, Error, IsolationLevel, Record, Result, Timestamp,
    TransactionId, Value,
};
pub use sluice_engine::{Arg, DbQuery, PlanNode, QueryPlan, Rule};
pub use tokio_util::sync::CancellationToken;
