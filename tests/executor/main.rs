//! Executor integration tests
//!
//! End-to-end runs of serialized plans against the SQLite backend:
//! - value round trips through bind and decode
//! - batch atomicity and per-item error attribution
//! - interactive transactions, cancellation and idle expiry
//! - relational plans (joins, templates, record mapping)
//! - configuration loading

mod common;

mod batches;
mod codec_round_trip;
mod configuration;
mod interactive;
mod plans;
