//! Raw driver errors
//!
//! A `DriverError` is what a backend reports: an optional vendor code and a
//! message. Adapters may pre-classify failures they detect themselves (a
//! dropped socket, a closed handle); everything else is classified by code in
//! [`crate::translate`].

use sluice_core::DatabaseErrorKind;

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Raw error reported by a driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    /// Vendor error code (SQLSTATE, MySQL errno, SQLite extended code, ...)
    pub code: Option<String>,
    /// Vendor message
    pub message: String,
    /// Classification the adapter already knows, bypassing the code table
    pub kind: Option<DatabaseErrorKind>,
    /// The driver itself failed mid-call; whether the statement ran is unknown
    pub fault: bool,
}

impl DriverError {
    /// Error with a vendor code
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
            kind: None,
            fault: false,
        }
    }

    /// Error the adapter has classified itself
    pub fn classified(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        DriverError {
            code: None,
            message: message.into(),
            kind: Some(kind),
            fault: false,
        }
    }

    /// The connection is unusable
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::classified(DatabaseErrorKind::ConnectionLost, message)
    }

    /// The driver failed while running a call, e.g. a worker panicked
    pub fn fault(message: impl Into<String>) -> Self {
        DriverError {
            fault: true,
            ..Self::new(None, message)
        }
    }
}
