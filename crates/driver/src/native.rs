//! Native values and queries
//!
//! `NativeValue` is the representation a driver binds and returns. It is
//! deliberately closer to wire types than the engine's `Value`: integers
//! keep their width, decimals are numeric text, JSON is a parsed document.

use serde::{Deserialize, Serialize};
use sluice_core::{ArgType, Column, Timestamp};

/// A value in the form a driver binds or returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// Double precision float
    Double(f64),
    /// Exact numeric as decimal text
    Numeric(String),
    /// Text
    Text(String),
    /// Binary
    Bytes(Vec<u8>),
    /// Parsed JSON document
    Json(serde_json::Value),
    /// Instant with nanosecond precision
    DateTime {
        /// Seconds since epoch
        secs: i64,
        /// Nanoseconds within the second
        nanos: u32,
    },
    /// Array parameter or array column
    Array(Vec<NativeValue>),
}

impl NativeValue {
    /// Render as JSON, for backends without a native array type
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            NativeValue::Null => J::Null,
            NativeValue::Bool(b) => J::Bool(*b),
            NativeValue::Int32(i) => J::from(*i),
            NativeValue::Int64(i) => J::from(*i),
            NativeValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            NativeValue::Numeric(s) | NativeValue::Text(s) => J::String(s.clone()),
            NativeValue::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            NativeValue::Json(v) => v.clone(),
            NativeValue::DateTime { .. } => J::String(self.datetime_text().unwrap_or_default()),
            NativeValue::Array(items) => J::Array(items.iter().map(NativeValue::to_json).collect()),
        }
    }

    /// RFC 3339 text for a `DateTime` value
    pub fn datetime_text(&self) -> Option<String> {
        match self {
            NativeValue::DateTime { secs, nanos } => {
                Timestamp::new(*secs, *nanos).map(|ts| ts.to_rfc3339())
            }
            _ => None,
        }
    }
}

/// A statement ready for the driver: SQL text plus positional arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeQuery {
    /// SQL text with backend placeholders
    pub sql: String,
    /// Arguments in placeholder order
    pub args: Vec<NativeValue>,
    /// Declared slot type of each argument
    pub arg_types: Vec<ArgType>,
}

impl NativeQuery {
    /// A statement without arguments
    pub fn new(sql: impl Into<String>) -> Self {
        NativeQuery {
            sql: sql.into(),
            args: Vec::new(),
            arg_types: Vec::new(),
        }
    }

    /// Attach arguments and their slot types
    pub fn with_args(mut self, args: Vec<NativeValue>, arg_types: Vec<ArgType>) -> Self {
        self.args = args;
        self.arg_types = arg_types;
        self
    }
}

/// Rows as returned by a driver, before decoding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResultSet {
    /// Column metadata
    pub columns: Vec<Column>,
    /// Rows of native values in column order
    pub rows: Vec<Vec<NativeValue>>,
    /// Identifier generated by an insert
    pub last_insert_id: Option<String>,
}

impl RawResultSet {
    /// Create a raw result set
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<NativeValue>>) -> Self {
        RawResultSet {
            columns,
            rows,
            last_insert_id: None,
        }
    }
}
