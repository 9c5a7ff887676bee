//! Driver adapter contract for Sluice
//!
//! This crate is the boundary between the engine and a concrete database:
//! - `adapter`: the `DriverAdapter` / `Connection` / `Queryable` traits and
//!   backend `Capabilities`
//! - `native`: native parameter and result values as drivers see them
//! - `codec`: engine `Value` <-> `NativeValue` conversion
//! - `error` / `translate`: raw driver errors and their translation into
//!   the engine taxonomy through per-backend error-code tables
//! - `sqlite`: SQLite backend (feature `sqlite`)
//! - `testing`: scripted in-memory backend for tests (feature `testing`)

#![warn(clippy::all)]

pub mod adapter;
pub mod codec;
pub mod error;
pub mod native;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "testing")]
pub mod testing;
pub mod translate;

pub use adapter::{Capabilities, Connection, ConnectionConfig, DriverAdapter, Queryable, TransactionToken};
pub use error::{DriverError, DriverResult};
pub use native::{NativeQuery, NativeValue, RawResultSet};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAdapter;
#[cfg(feature = "testing")]
pub use testing::ScriptedAdapter;
pub use translate::{translate, ErrorCodeTable};
