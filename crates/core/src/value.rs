//! Value types for Sluice
//!
//! This module defines:
//! - Value: the engine-level value every plan node consumes and produces
//! - Cursor: a lazily materialized view over a decoded result set
//! - Record: an ordered map from field name to value
//!
//! ## Type Rules
//!
//! - No implicit coercions: `Int(1) != Float(1.0)`, `Decimal("1") != Int(1)`
//! - Decimals are carried as their exact decimal text and never pass through
//!   a binary float
//! - Float equality follows IEEE-754 (`NaN != NaN`, `-0.0 == 0.0`)
//! - A `Cursor` compares equal to the `List` of records it materializes to

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::result::ResultSet;
use crate::timestamp::Timestamp;

/// Field name to value mapping; iteration order is the key order
pub type Record = BTreeMap<String, Value>;

/// Engine value
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// Exact decimal, kept as its textual form
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Date and time with nanosecond precision
    DateTime(Timestamp),
    /// JSON document text
    Json(String),
    /// Ordered list of values
    List(Vec<Value>),
    /// Record of named fields
    Record(Record),
    /// Rows of a query result, materialized into records on first access
    #[serde(skip_deserializing)]
    Cursor(Cursor),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(_) | Value::Cursor(_), Value::List(_) | Value::Cursor(_)) => {
                self.as_list() == other.as_list()
            }
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Decimal(_) => "Decimal",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::DateTime(_) => "DateTime",
            Value::Json(_) => "Json",
            Value::List(_) => "List",
            Value::Record(_) => "Record",
            Value::Cursor(_) => "Cursor",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this is a list or a cursor
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_) | Value::Cursor(_))
    }

    /// Check if this is a record
    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    /// Null, an empty list, or an empty cursor
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Cursor(cursor) => cursor.row_count() == 0,
            _ => false,
        }
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the decimal text if this is a Decimal value
    pub fn as_decimal(&self) -> Option<&str> {
        match self {
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[u8] if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the timestamp if this is a DateTime value
    pub fn as_datetime(&self) -> Option<Timestamp> {
        match self {
            Value::DateTime(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Get the elements of a List, or the materialized records of a Cursor
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            Value::Cursor(cursor) => Some(cursor.records()),
            _ => None,
        }
    }

    /// Get as &Record if this is a Record value
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Numeric view used by in-memory arithmetic
    ///
    /// Decimals and numeric strings are parsed; this is the only place a
    /// decimal is allowed to lose precision.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(s) | Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Take the elements of a list-like value
    ///
    /// Null becomes an empty list and any other scalar a single-element list.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            Value::Cursor(cursor) => cursor.records().to_vec(),
            other => vec![other],
        }
    }

    /// Replace every cursor in this value tree by the list it materializes to
    pub fn materialize(self) -> Value {
        match self {
            Value::Cursor(cursor) => {
                Value::List(cursor.records().iter().cloned().map(Value::materialize).collect())
            }
            Value::List(items) => Value::List(items.into_iter().map(Value::materialize).collect()),
            Value::Record(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.materialize()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// JSON rendering used for keys, diffs and JSON-typed parameters
    ///
    /// Decimals render as strings to keep their digits; bytes as base64;
    /// datetimes as RFC 3339.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Decimal(s) => J::String(s.clone()),
            Value::String(s) => J::String(s.clone()),
            Value::Bytes(b) => J::String(BASE64.encode(b)),
            Value::DateTime(ts) => J::String(ts.to_rfc3339()),
            Value::Json(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| J::String(text.clone()))
            }
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => J::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Cursor(cursor) => J::Array(cursor.records().iter().map(Value::to_json).collect()),
        }
    }
}

/// True when `text` is a decimal literal: optional sign, digits with an
/// optional fractional part, optional exponent
pub fn is_decimal_literal(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == bytes.len()
}

// ============================================================================
// Cursor
// ============================================================================

/// Lazily materialized rows of a query result
///
/// Clones share both the underlying result set and the materialization, so
/// a cursor bound once and read from several plan nodes converts its rows a
/// single time.
#[derive(Clone)]
pub struct Cursor {
    inner: Arc<CursorInner>,
}

struct CursorInner {
    set: ResultSet,
    records: OnceLock<Vec<Value>>,
}

impl Cursor {
    /// Wrap a decoded result set
    pub fn new(set: ResultSet) -> Self {
        Cursor {
            inner: Arc::new(CursorInner {
                set,
                records: OnceLock::new(),
            }),
        }
    }

    /// The underlying result set
    pub fn result_set(&self) -> &ResultSet {
        &self.inner.set
    }

    /// Number of rows, without materializing
    pub fn row_count(&self) -> usize {
        self.inner.set.rows.len()
    }

    /// Whether the rows have been turned into records yet
    pub fn is_materialized(&self) -> bool {
        self.inner.records.get().is_some()
    }

    /// Rows as records, materialized on first call
    pub fn records(&self) -> &[Value] {
        self.inner.records.get_or_init(|| self.inner.set.to_records())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("rows", &self.row_count())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records().serialize(serializer)
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::DateTime(ts)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<ResultSet> for Value {
    fn from(set: ResultSet) -> Self {
        Value::Cursor(Cursor::new(set))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    // Beyond i64: keep the digits exact.
                    Value::Decimal(n.to_string())
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Column, ColumnType};

    fn cursor_of(ids: &[i64]) -> Value {
        Value::from(ResultSet::new(
            vec![Column::new("id", ColumnType::Int64)],
            ids.iter().map(|id| vec![Value::Int(*id)]).collect(),
        ))
    }

    fn record(id: i64) -> Value {
        let mut r = Record::new();
        r.insert("id".into(), Value::Int(id));
        Value::Record(r)
    }

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Decimal("1".into()), Value::Int(1));
        assert_ne!(Value::String("1".into()), Value::Decimal("1".into()));
        assert_ne!(Value::Json("{}".into()), Value::String("{}".into()));
    }

    #[test]
    fn test_float_ieee_semantics() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_cursor_equals_materialized_list() {
        let cursor = cursor_of(&[1, 2]);
        assert_eq!(cursor, Value::List(vec![record(1), record(2)]));
    }

    #[test]
    fn test_cursor_clones_share_materialization() {
        let cursor = cursor_of(&[1, 2, 3]);
        let Value::Cursor(inner) = &cursor else {
            panic!("expected cursor");
        };
        let shared = inner.clone();
        assert!(!shared.is_materialized());
        assert_eq!(inner.row_count(), 3);
        assert!(!shared.is_materialized(), "row_count must not materialize");
        let _ = inner.records();
        assert!(shared.is_materialized());
    }

    #[test]
    fn test_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(cursor_of(&[]).is_empty());
        assert!(!cursor_of(&[1]).is_empty());
        assert!(!Value::Int(0).is_empty());
    }

    #[test]
    fn test_into_list_shapes() {
        assert!(Value::Null.into_list().is_empty());
        assert_eq!(Value::Int(4).into_list(), vec![Value::Int(4)]);
        assert_eq!(cursor_of(&[9]).into_list(), vec![record(9)]);
    }

    #[test]
    fn test_materialize_replaces_nested_cursors() {
        let mut r = Record::new();
        r.insert("rows".into(), cursor_of(&[5]));
        let value = Value::Record(r).materialize();
        let rows = value.as_record().unwrap().get("rows").unwrap();
        assert!(matches!(rows, Value::List(items) if items.len() == 1));
    }

    #[test]
    fn test_to_json_keeps_decimal_digits() {
        let d = Value::Decimal("123456789012345678.987654321".into());
        assert_eq!(
            d.to_json(),
            serde_json::Value::String("123456789012345678.987654321".into())
        );
        assert_eq!(
            Value::Bytes(b"hi".to_vec()).to_json(),
            serde_json::Value::String("aGk=".into())
        );
    }

    #[test]
    fn test_from_json_large_unsigned_stays_exact() {
        let v = Value::from(serde_json::json!(18446744073709551615u64));
        assert_eq!(v, Value::Decimal("18446744073709551615".into()));
        assert_eq!(Value::from(serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from(serde_json::json!(1.5)), Value::Float(1.5));
    }

    #[test]
    fn test_decimal_literal_recognition() {
        for ok in ["0", "-1", "+3.25", ".5", "5.", "1e10", "2.5E-3"] {
            assert!(is_decimal_literal(ok), "{ok} should be a decimal");
        }
        for bad in ["", "-", ".", "1e", "1.2.3", "abc", "1 000", "NaN"] {
            assert!(!is_decimal_literal(bad), "{bad} should not be a decimal");
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn formatted_numbers_are_decimal_literals(i in any::<i64>(), frac in 0u32..1_000_000) {
                let text = format!("{i}.{frac:06}");
                prop_assert!(is_decimal_literal(&text));
            }
        }
    }
}
