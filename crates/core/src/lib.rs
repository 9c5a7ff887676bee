//! Core types for Sluice
//!
//! This crate defines the types shared by every layer of the engine:
//! - Value: the engine-level value model that plans consume and produce
//! - Timestamp: second + nanosecond instants with RFC 3339 rendering
//! - ResultSet / Column / ColumnType: decoded query results
//! - IsolationLevel / ArgType / TransactionId: transaction and binding metadata
//! - Error: the engine error taxonomy every failure is reported through

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod result;
pub mod timestamp;
pub mod types;
pub mod value;

pub use error::{ClosedReason, DatabaseError, DatabaseErrorKind, Error, Result};
pub use result::{Column, ColumnType, ResultSet};
pub use timestamp::Timestamp;
pub use types::{ArgScalarType, ArgType, Arity, IsolationLevel, TransactionId};
pub use value::{is_decimal_literal, Cursor, Record, Value};
