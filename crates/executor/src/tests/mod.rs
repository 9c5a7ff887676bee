//! Test modules for the executor crate.

pub mod determinism;

use std::sync::Arc;
use std::time::Duration;

use sluice_driver::{DriverError, ScriptedAdapter};

use crate::{Executor, PoolConfig, TransactionOptions};

/// Executor over a scripted backend
pub(crate) fn scripted_executor(adapter: &ScriptedAdapter) -> Executor {
    Executor::new(
        Arc::new(adapter.clone()),
        PoolConfig {
            max_connections: 4,
            acquire_timeout: Duration::from_millis(200),
        },
        TransactionOptions::default(),
    )
}

/// Unique-constraint failure as a PostgreSQL backend reports it
pub(crate) fn duplicate_key() -> DriverError {
    DriverError::new(Some("23505".into()), "duplicate key value violates unique constraint")
}
