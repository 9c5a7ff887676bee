//! Error taxonomy for Sluice
//!
//! Every failure surfaced by the engine is an [`Error`]. Raw driver errors
//! never cross a layer boundary: the driver crate translates them into
//! [`Error::Database`] with a [`DatabaseErrorKind`] looked up from the
//! backend's error-code table, keeping the original code and message.
//!
//! ## Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Plan | `PlanBinding`, `PlanAssertion` |
//! | Encoding | `Encoding` |
//! | Resources | `PoolExhausted` |
//! | Transactions | `TransactionClosed`, `TransactionNotFound`, `TransactionAlreadyActive`, `InvalidIsolationLevel` |
//! | Execution | `Cancelled`, `Database`, `Batch` |
//! | System | `Internal` |
//!
//! Only `PoolExhausted` and the timeout / connection-lost database kinds are
//! retryable; see [`Error::is_retryable`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an interactive transaction is no longer open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClosedReason {
    /// Committed by the caller
    Committed,
    /// Rolled back by the caller, by cancellation, or after a failed step
    RolledBack,
    /// Rolled back by the engine after the idle timeout elapsed
    TimedOut,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedReason::Committed => f.write_str("committed"),
            ClosedReason::RolledBack => f.write_str("rolled back"),
            ClosedReason::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Classified database failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseErrorKind {
    /// Unique or primary key constraint violated
    UniqueConstraintViolation,
    /// NOT NULL constraint violated
    NullConstraintViolation,
    /// Foreign key constraint violated
    ForeignKeyConstraintViolation,
    /// Statement or lock timed out
    Timeout,
    /// The connection to the backend was lost
    ConnectionLost,
    /// The backend rejected the statement (syntax, missing table, ...)
    Query,
    /// No mapping exists for the backend's code
    Unknown,
}

impl DatabaseErrorKind {
    /// Stable identifier for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorKind::UniqueConstraintViolation => "UniqueConstraintViolation",
            DatabaseErrorKind::NullConstraintViolation => "NullConstraintViolation",
            DatabaseErrorKind::ForeignKeyConstraintViolation => "ForeignKeyConstraintViolation",
            DatabaseErrorKind::Timeout => "DatabaseTimeout",
            DatabaseErrorKind::ConnectionLost => "ConnectionLost",
            DatabaseErrorKind::Query => "QueryError",
            DatabaseErrorKind::Unknown => "UnknownDatabaseError",
        }
    }
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A translated database error with the backend's original code and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseError {
    /// Classified kind
    pub kind: DatabaseErrorKind,
    /// Backend error code, when the backend reported one
    pub code: Option<String>,
    /// Backend error message
    pub message: String,
}

impl DatabaseError {
    /// Create a database error
    pub fn new(kind: DatabaseErrorKind, code: Option<String>, message: impl Into<String>) -> Self {
        DatabaseError {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Timeouts and lost connections may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Timeout | DatabaseErrorKind::ConnectionLost
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DatabaseError {}

/// Engine error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    // ==================== Plan ====================
    /// A placeholder or binding could not be resolved, or a name was bound
    /// twice in one scope
    #[error("plan binding error: {reason}")]
    PlanBinding {
        /// What failed to resolve
        reason: String,
    },

    /// A plan-level check (`required`, `unique`, `validate`) failed
    #[error("plan assertion failed: {message}")]
    PlanAssertion {
        /// Assertion message
        message: String,
    },

    // ==================== Encoding ====================
    /// A value could not be encoded into, or decoded from, its native form
    #[error("encoding error at {path}: {reason}")]
    Encoding {
        /// Where the value sits (`params[2]`, `rows[0].price`, ...)
        path: String,
        /// What went wrong
        reason: String,
    },

    // ==================== Resources ====================
    /// No pooled connection became available before the timeout
    #[error("connection pool exhausted: no connection available within {timeout_ms}ms")]
    PoolExhausted {
        /// How long the checkout waited
        timeout_ms: u64,
    },

    // ==================== Transactions ====================
    /// The transaction was already committed, rolled back or timed out
    #[error("transaction {id} is {reason}; cannot {operation}")]
    TransactionClosed {
        /// Transaction id
        id: String,
        /// Operation that was attempted
        operation: String,
        /// How the transaction ended
        reason: ClosedReason,
    },

    /// No open or recently closed transaction has this id
    #[error("transaction not found: {id}")]
    TransactionNotFound {
        /// Transaction id
        id: String,
    },

    /// A transaction is already active on this connection
    #[error("a transaction is already active on this connection")]
    TransactionAlreadyActive,

    /// The backend does not support the requested isolation level
    #[error("isolation level {level} is not supported by {provider}")]
    InvalidIsolationLevel {
        /// Requested level
        level: String,
        /// Backend provider name
        provider: String,
    },

    // ==================== Execution ====================
    /// Execution was cancelled by the caller
    #[error("execution cancelled")]
    Cancelled,

    /// The database rejected an operation
    #[error("database error: {0}")]
    Database(DatabaseError),

    /// A batched request failed; `index` is the position of the failing
    /// request in the submitted batch
    #[error("batch request {index} failed: {source}")]
    Batch {
        /// Index of the failing request
        index: usize,
        /// The underlying failure
        source: Box<Error>,
    },

    // ==================== System ====================
    /// Internal invariant violated
    #[error("internal error: {reason}")]
    Internal {
        /// What went wrong
        reason: String,
    },
}

impl Error {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Binding failure
    pub fn binding(reason: impl Into<String>) -> Self {
        Error::PlanBinding {
            reason: reason.into(),
        }
    }

    /// Plan assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Error::PlanAssertion {
            message: message.into(),
        }
    }

    /// Encoding failure at `path`
    pub fn encoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Encoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Internal failure
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Database failure
    pub fn database(kind: DatabaseErrorKind, code: Option<String>, message: impl Into<String>) -> Self {
        Error::Database(DatabaseError::new(kind, code, message))
    }

    /// Attribute this error to the batch item at `index`
    ///
    /// An error that already carries a batch index keeps it.
    pub fn with_batch_index(self, index: usize) -> Self {
        match self {
            already @ Error::Batch { .. } => already,
            other => Error::Batch {
                index,
                source: Box::new(other),
            },
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Stable, machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::PlanBinding { .. } => "PlanBindingError",
            Error::PlanAssertion { .. } => "PlanAssertionError",
            Error::Encoding { .. } => "EncodingError",
            Error::PoolExhausted { .. } => "PoolExhausted",
            Error::TransactionClosed { .. } => "TransactionClosed",
            Error::TransactionNotFound { .. } => "TransactionNotFound",
            Error::TransactionAlreadyActive => "TransactionAlreadyActive",
            Error::InvalidIsolationLevel { .. } => "InvalidIsolationLevel",
            Error::Cancelled => "Cancelled",
            Error::Database(e) => e.kind.as_str(),
            Error::Batch { source, .. } => source.kind(),
            Error::Internal { .. } => "InternalError",
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::PoolExhausted { .. } => true,
            Error::Database(e) => e.is_retryable(),
            Error::Batch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Batch index, when this error was attributed to a batch item
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            Error::Batch { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The error with any batch attribution removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Batch { source, .. } => source.root(),
            other => other,
        }
    }

    /// Database kind, if this is (or wraps) a database error
    pub fn database_kind(&self) -> Option<DatabaseErrorKind> {
        match self.root() {
            Error::Database(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::PoolExhausted { timeout_ms: 10 }.is_retryable());
        assert!(Error::database(DatabaseErrorKind::Timeout, None, "slow").is_retryable());
        assert!(Error::database(DatabaseErrorKind::ConnectionLost, None, "gone").is_retryable());
        assert!(
            !Error::database(DatabaseErrorKind::UniqueConstraintViolation, Some("23505".into()), "dup")
                .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::binding("x").is_retryable());
    }

    #[test]
    fn test_batch_index_wraps_once() {
        let err = Error::binding("missing `id`").with_batch_index(2).with_batch_index(4);
        assert_eq!(err.batch_index(), Some(2));
        assert!(matches!(err.root(), Error::PlanBinding { .. }));
        assert_eq!(err.kind(), "PlanBindingError");
    }

    #[test]
    fn test_batch_retryable_follows_source() {
        let err = Error::PoolExhausted { timeout_ms: 5 }.with_batch_index(0);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_database_error_display_keeps_code_and_message() {
        let err = Error::database(
            DatabaseErrorKind::UniqueConstraintViolation,
            Some("2067".into()),
            "UNIQUE constraint failed: users.email",
        );
        let text = err.to_string();
        assert!(text.contains("2067"), "{text}");
        assert!(text.contains("users.email"), "{text}");
        assert_eq!(err.kind(), "UniqueConstraintViolation");
        assert_eq!(
            err.database_kind(),
            Some(DatabaseErrorKind::UniqueConstraintViolation)
        );
    }

    #[test]
    fn test_transaction_closed_message() {
        let err = Error::TransactionClosed {
            id: "t1".into(),
            operation: "commit".into(),
            reason: ClosedReason::TimedOut,
        };
        assert_eq!(err.to_string(), "transaction t1 is timed out; cannot commit");
    }

    #[test]
    fn test_error_is_clone_and_serializable() {
        let err = Error::encoding("params[0]", "value out of 64-bit range").with_batch_index(1);
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
