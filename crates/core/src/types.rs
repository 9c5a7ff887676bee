//! Transaction and binding metadata
//!
//! This module defines:
//! - TransactionId: identifier of an interactive transaction
//! - IsolationLevel: SQL isolation levels, applied at BEGIN
//! - ArgType / ArgScalarType / Arity: the declared slot type of a query
//!   parameter, used to pick the native encoding

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of an interactive transaction
///
/// Wraps a UUID v4. Ids are handed to callers on start and presented back
/// on every subsequent operation of that transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new random TransactionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a TransactionId from its string form
    ///
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Isolation levels
// ============================================================================

/// SQL transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// READ UNCOMMITTED
    ReadUncommitted,
    /// READ COMMITTED
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// SNAPSHOT (SQL Server only)
    Snapshot,
    /// SERIALIZABLE
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first
    pub const ALL: [IsolationLevel; 5] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Snapshot,
        IsolationLevel::Serializable,
    ];

    /// SQL keyword form, as used in `SET TRANSACTION ISOLATION LEVEL`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    /// Case-insensitive; words may be separated by spaces or underscores,
    /// or run together (`ReadCommitted`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "readuncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "readcommitted" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" => Ok(IsolationLevel::RepeatableRead),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(s.to_string()),
        }
    }
}

// ============================================================================
// Argument slot types
// ============================================================================

/// Scalar kind of a query parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgScalarType {
    /// Text
    String,
    /// 32/64-bit integer column
    Int,
    /// 64-bit integer column
    BigInt,
    /// Floating point
    Float,
    /// Exact decimal
    Decimal,
    /// Boolean
    Boolean,
    /// Enum label (encoded as text)
    Enum,
    /// UUID (encoded as text after validation)
    Uuid,
    /// JSON document
    Json,
    /// Date and time
    DateTime,
    /// Binary
    Bytes,
    /// No declared type; the encoding follows the value
    Unknown,
}

/// Whether a slot takes a single value or a list of values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Arity {
    /// One value
    #[default]
    Scalar,
    /// A list of values (array parameter)
    List,
}

/// Declared type of a query parameter slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgType {
    /// Scalar kind
    pub scalar: ArgScalarType,
    /// Scalar or list
    #[serde(default)]
    pub arity: Arity,
}

impl ArgType {
    /// Untyped slot
    pub const UNKNOWN: ArgType = ArgType {
        scalar: ArgScalarType::Unknown,
        arity: Arity::Scalar,
    };

    /// Single-value slot of the given kind
    pub const fn scalar(scalar: ArgScalarType) -> Self {
        ArgType {
            scalar,
            arity: Arity::Scalar,
        }
    }

    /// List slot of the given element kind
    pub const fn list(scalar: ArgScalarType) -> Self {
        ArgType {
            scalar,
            arity: Arity::List,
        }
    }

    /// The slot type of one element of this slot
    pub const fn element(&self) -> ArgType {
        ArgType::scalar(self.scalar)
    }

    /// True for list slots
    pub fn is_list(&self) -> bool {
        self.arity == Arity::List
    }
}

impl Default for ArgType {
    fn default() -> Self {
        ArgType::UNKNOWN
    }
}
