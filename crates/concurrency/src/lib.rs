//! Concurrency layer for Sluice
//!
//! This crate owns everything that decides who may talk to the database and
//! when:
//! - Pool: bounded connection checkout with a timeout
//! - TransactionContext: one unit of work bound to one pooled connection,
//!   with its state machine and nested scopes (savepoints)
//! - TransactionManager: the registry of open interactive transactions,
//!   their idle timeouts, and the record of recently closed ones

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod pool;
pub mod transaction;

pub use manager::{TransactionLease, TransactionManager, MAX_CLOSED_TRANSACTIONS};
pub use pool::{Pool, PoolConfig, PoolStatus, PooledConnection};
pub use transaction::{
    validate_isolation, NestedScope, TransactionContext, TransactionKind, TransactionOptions,
    TransactionState,
};
