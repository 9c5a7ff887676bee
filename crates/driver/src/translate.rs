//! Driver error translation
//!
//! Each backend ships an [`ErrorCodeTable`] mapping its vendor codes onto
//! [`DatabaseErrorKind`]. [`translate`] is the single point where a raw
//! [`DriverError`] becomes an engine [`Error`]; the original code and message
//! are always preserved.
//!
//! | Kind | Postgres | MySQL | SQLite (extended) |
//! |------|----------|-------|-------------------|
//! | UniqueConstraintViolation | 23505 | 1062 | 2067, 1555 |
//! | NullConstraintViolation | 23502 | 1048 | 1299 |
//! | ForeignKeyConstraintViolation | 23503 | 1451, 1452 | 787 |
//! | Timeout | 57014, 55P03 | 1205, 3024 | 5, 517, 261 |
//! | ConnectionLost | 08000, 08003, 08006, 57P01 | 2006, 2013 | |
//! | Query | 42601, 42P01, 42703 | 1064, 1146, 1054 | 1 |

use rustc_hash::FxHashMap;
use sluice_core::{DatabaseError, DatabaseErrorKind, Error};

use crate::error::DriverError;

/// Vendor code to error kind mapping for one backend
#[derive(Debug, Clone, Default)]
pub struct ErrorCodeTable {
    entries: FxHashMap<String, DatabaseErrorKind>,
}

impl ErrorCodeTable {
    /// Empty table; every code translates to `Unknown`
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping
    pub fn with(mut self, code: impl Into<String>, kind: DatabaseErrorKind) -> Self {
        self.entries.insert(code.into(), kind);
        self
    }

    fn with_all(self, codes: &[&str], kind: DatabaseErrorKind) -> Self {
        codes.iter().fold(self, |table, code| table.with(*code, kind))
    }

    /// Look up the kind for a vendor code
    pub fn lookup(&self, code: &str) -> Option<DatabaseErrorKind> {
        self.entries.get(code).copied()
    }

    /// PostgreSQL SQLSTATE codes
    pub fn postgres() -> Self {
        use DatabaseErrorKind::*;
        Self::new()
            .with("23505", UniqueConstraintViolation)
            .with("23502", NullConstraintViolation)
            .with("23503", ForeignKeyConstraintViolation)
            .with_all(&["57014", "55P03"], Timeout)
            .with_all(&["08000", "08003", "08006", "57P01"], ConnectionLost)
            .with_all(&["42601", "42P01", "42703"], Query)
    }

    /// MySQL / MariaDB error numbers
    pub fn mysql() -> Self {
        use DatabaseErrorKind::*;
        Self::new()
            .with("1062", UniqueConstraintViolation)
            .with("1048", NullConstraintViolation)
            .with_all(&["1451", "1452"], ForeignKeyConstraintViolation)
            .with_all(&["1205", "3024"], Timeout)
            .with_all(&["2006", "2013"], ConnectionLost)
            .with_all(&["1064", "1146", "1054"], Query)
    }

    /// SQLite extended result codes
    pub fn sqlite() -> Self {
        use DatabaseErrorKind::*;
        Self::new()
            .with_all(&["2067", "1555"], UniqueConstraintViolation)
            .with("1299", NullConstraintViolation)
            .with("787", ForeignKeyConstraintViolation)
            // SQLITE_BUSY, SQLITE_BUSY_SNAPSHOT, SQLITE_BUSY_RECOVERY
            .with_all(&["5", "517", "261"], Timeout)
            .with("1", Query)
    }
}

/// Translate a raw driver error into the engine taxonomy
///
/// Adapter-side classification wins over the table; an unmapped code
/// becomes `Unknown`.
pub fn translate(err: DriverError, table: &ErrorCodeTable) -> Error {
    if err.fault {
        return Error::internal(err.message);
    }
    let kind = err
        .kind
        .or_else(|| err.code.as_deref().and_then(|code| table.lookup(code)))
        .unwrap_or(DatabaseErrorKind::Unknown);
    Error::Database(DatabaseError::new(kind, err.code, err.message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(err: DriverError, table: &ErrorCodeTable) -> DatabaseErrorKind {
        match translate(err, table) {
            Error::Database(e) => e.kind,
            other => panic!("expected database error, got {other:?}"),
        }
    }

    #[test]
    fn test_unique_violation_per_backend() {
        let pg = DriverError::new(Some("23505".into()), "duplicate key value");
        let my = DriverError::new(Some("1062".into()), "Duplicate entry");
        let lite = DriverError::new(Some("2067".into()), "UNIQUE constraint failed");
        assert_eq!(kind_of(pg, &ErrorCodeTable::postgres()), DatabaseErrorKind::UniqueConstraintViolation);
        assert_eq!(kind_of(my, &ErrorCodeTable::mysql()), DatabaseErrorKind::UniqueConstraintViolation);
        assert_eq!(kind_of(lite, &ErrorCodeTable::sqlite()), DatabaseErrorKind::UniqueConstraintViolation);
    }

    #[test]
    fn test_driver_fault_is_internal() {
        let err = translate(DriverError::fault("sqlite worker failed: task panicked"), &ErrorCodeTable::sqlite());
        assert!(matches!(err, Error::Internal { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_translation_preserves_code_and_message() {
        let raw = DriverError::new(Some("23503".into()), "insert violates foreign key");
        match translate(raw, &ErrorCodeTable::postgres()) {
            Error::Database(e) => {
                assert_eq!(e.kind, DatabaseErrorKind::ForeignKeyConstraintViolation);
                assert_eq!(e.code.as_deref(), Some("23503"));
                assert_eq!(e.message, "insert violates foreign key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_code_is_unknown() {
        let raw = DriverError::new(Some("99999".into()), "mystery");
        assert_eq!(kind_of(raw, &ErrorCodeTable::postgres()), DatabaseErrorKind::Unknown);
        let codeless = DriverError::new(None, "no code at all");
        assert_eq!(kind_of(codeless, &ErrorCodeTable::sqlite()), DatabaseErrorKind::Unknown);
    }

    #[test]
    fn test_adapter_classification_wins() {
        let raw = DriverError::connection_closed("socket hang up");
        assert_eq!(kind_of(raw, &ErrorCodeTable::new()), DatabaseErrorKind::ConnectionLost);
    }

    #[test]
    fn test_timeouts_are_retryable_after_translation() {
        let raw = DriverError::new(Some("5".into()), "database is locked");
        assert!(translate(raw, &ErrorCodeTable::sqlite()).is_retryable());
    }
}
