//! Sluice - query plan execution over pluggable database drivers
//!
//! A plan is a tree of reads, writes and in-memory transforms produced by a
//! query compiler. Sluice evaluates it against a backend through a driver
//! adapter, owning the connection pool, transaction scoping and the mapping
//! of values between the plan and the database.
//!
//! # Quick Start
//!
//! ```ignore
//! use sluice::{EngineConfig, Executor, PlanNode, Request};
//!
//! let executor = Executor::from_config(&EngineConfig::default())?;
//! let one = executor
//!     .execute(Request::new(PlanNode::raw_query("SELECT 1 AS one", vec![])))
//!     .await?;
//! ```
//!
//! # Architecture
//!
//! Everything runs through the [`Executor`]. Driver adapters, the pool and
//! the interpreter live in their own crates and are not exposed here beyond
//! the types a request is built from.

// Re-export the public API from sluice-executor
pub use sluice_executor::*;
