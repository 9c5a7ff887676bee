//! Value codec
//!
//! Converts engine values into native parameters according to the declared
//! slot type, and native results back into engine values according to the
//! declared column type.
//!
//! ## Rules
//!
//! - Integers bound to an integer slot must fit in 64 bits; anything else is
//!   an encoding error raised before the statement is dispatched
//! - Decimals travel as text end to end and are never routed through `f64`
//! - Datetimes keep nanosecond precision; text results in datetime columns
//!   are parsed as RFC 3339
//! - Null encodes and decodes as null for every type

use sluice_core::{
    is_decimal_literal, ArgScalarType, ArgType, Column, ColumnType, Error, ResultSet, Result,
    Timestamp, Value,
};

use crate::native::{NativeValue, RawResultSet};

// ============================================================================
// Encoding
// ============================================================================

/// Encode a list of parameters against their slot types
///
/// Missing slot types are treated as untyped.
pub fn encode_params(values: &[Value], types: &[ArgType]) -> Result<Vec<NativeValue>> {
    if types.len() > values.len() {
        return Err(Error::encoding(
            "params",
            format!("{} argument types declared for {} parameters", types.len(), values.len()),
        ));
    }
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let slot = types.get(i).unwrap_or(&ArgType::UNKNOWN);
            encode(value, slot, &format!("params[{i}]"))
        })
        .collect()
}

/// Encode one value for a slot
pub fn encode(value: &Value, slot: &ArgType, path: &str) -> Result<NativeValue> {
    if value.is_null() {
        return Ok(NativeValue::Null);
    }
    if slot.is_list() {
        let items = value
            .as_list()
            .ok_or_else(|| mismatch(path, value, "list"))?;
        let element = slot.element();
        return items
            .iter()
            .enumerate()
            .map(|(i, item)| encode(item, &element, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(NativeValue::Array);
    }
    match slot.scalar {
        ArgScalarType::Int | ArgScalarType::BigInt => encode_int(value, path),
        ArgScalarType::Float => encode_float(value, path),
        ArgScalarType::Decimal => encode_decimal(value, path),
        ArgScalarType::Boolean => match value {
            Value::Bool(b) => Ok(NativeValue::Bool(*b)),
            Value::Int(0) => Ok(NativeValue::Bool(false)),
            Value::Int(1) => Ok(NativeValue::Bool(true)),
            other => Err(mismatch(path, other, "boolean")),
        },
        ArgScalarType::String | ArgScalarType::Enum => match value {
            Value::String(s) => Ok(NativeValue::Text(s.clone())),
            other => Err(mismatch(path, other, "string")),
        },
        ArgScalarType::Uuid => match value {
            Value::String(s) if uuid::Uuid::parse_str(s).is_ok() => Ok(NativeValue::Text(s.clone())),
            Value::String(s) => Err(Error::encoding(path, format!("`{s}` is not a valid UUID"))),
            other => Err(mismatch(path, other, "uuid")),
        },
        ArgScalarType::Json => encode_json(value, path),
        ArgScalarType::DateTime => match value {
            Value::DateTime(ts) => Ok(datetime(*ts)),
            Value::String(s) => Timestamp::parse_rfc3339(s)
                .map(datetime)
                .ok_or_else(|| Error::encoding(path, format!("`{s}` is not an RFC 3339 datetime"))),
            other => Err(mismatch(path, other, "datetime")),
        },
        ArgScalarType::Bytes => match value {
            Value::Bytes(b) => Ok(NativeValue::Bytes(b.clone())),
            other => Err(mismatch(path, other, "bytes")),
        },
        ArgScalarType::Unknown => Ok(infer(value)),
    }
}

fn encode_int(value: &Value, path: &str) -> Result<NativeValue> {
    match value {
        Value::Int(i) => Ok(NativeValue::Int64(*i)),
        Value::Decimal(s) | Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(NativeValue::Int64(i));
            }
            if is_integral_literal(trimmed) {
                Err(out_of_range(path, trimmed))
            } else {
                Err(Error::encoding(path, format!("`{trimmed}` is not an integer")))
            }
        }
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => {
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
            if *f >= -9_223_372_036_854_775_808.0 && *f < 9_223_372_036_854_775_808.0 {
                Ok(NativeValue::Int64(*f as i64))
            } else {
                Err(out_of_range(path, &f.to_string()))
            }
        }
        other => Err(mismatch(path, other, "integer")),
    }
}

fn encode_float(value: &Value, path: &str) -> Result<NativeValue> {
    match value {
        Value::Float(f) => Ok(NativeValue::Double(*f)),
        Value::Int(i) => Ok(NativeValue::Double(*i as f64)),
        Value::Decimal(s) => s
            .trim()
            .parse()
            .map(NativeValue::Double)
            .map_err(|_| Error::encoding(path, format!("`{s}` is not a number"))),
        other => Err(mismatch(path, other, "float")),
    }
}

fn encode_decimal(value: &Value, path: &str) -> Result<NativeValue> {
    match value {
        Value::Decimal(s) | Value::String(s) if is_decimal_literal(s.trim()) => {
            Ok(NativeValue::Numeric(s.trim().to_string()))
        }
        Value::Decimal(s) | Value::String(s) => {
            Err(Error::encoding(path, format!("`{s}` is not a decimal")))
        }
        Value::Int(i) => Ok(NativeValue::Numeric(i.to_string())),
        Value::Float(f) if f.is_finite() => Ok(NativeValue::Numeric(f.to_string())),
        other => Err(mismatch(path, other, "decimal")),
    }
}

fn encode_json(value: &Value, path: &str) -> Result<NativeValue> {
    match value {
        Value::Json(text) | Value::String(text) => serde_json::from_str(text)
            .map(NativeValue::Json)
            .map_err(|e| Error::encoding(path, format!("invalid JSON: {e}"))),
        other => Ok(NativeValue::Json(other.to_json())),
    }
}

/// Encoding for untyped slots follows the value
fn infer(value: &Value) -> NativeValue {
    match value {
        Value::Null => NativeValue::Null,
        Value::Bool(b) => NativeValue::Bool(*b),
        Value::Int(i) => NativeValue::Int64(*i),
        Value::Float(f) => NativeValue::Double(*f),
        Value::Decimal(s) => NativeValue::Numeric(s.clone()),
        Value::String(s) => NativeValue::Text(s.clone()),
        Value::Bytes(b) => NativeValue::Bytes(b.clone()),
        Value::DateTime(ts) => datetime(*ts),
        Value::Json(text) => serde_json::from_str(text)
            .map(NativeValue::Json)
            .unwrap_or_else(|_| NativeValue::Text(text.clone())),
        Value::List(_) | Value::Cursor(_) => NativeValue::Array(
            value
                .as_list()
                .unwrap_or_default()
                .iter()
                .map(infer)
                .collect(),
        ),
        Value::Record(_) => NativeValue::Json(value.to_json()),
    }
}

fn datetime(ts: Timestamp) -> NativeValue {
    NativeValue::DateTime {
        secs: ts.secs(),
        nanos: ts.nanos(),
    }
}

fn is_integral_literal(text: &str) -> bool {
    let digits = text
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn out_of_range(path: &str, literal: &str) -> Error {
    Error::encoding(path, format!("value {literal} is out of 64-bit integer range"))
}

fn mismatch(path: &str, value: &Value, expected: &str) -> Error {
    Error::encoding(
        path,
        format!("cannot encode {} as {expected}", value.type_name()),
    )
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode every cell of a raw result set using its column's declared type
pub fn decode_result_set(raw: RawResultSet) -> Result<ResultSet> {
    let RawResultSet {
        columns,
        rows,
        last_insert_id,
    } = raw;
    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(r, row)| decode_row(&columns, row, r))
        .collect::<Result<Vec<_>>>()?;
    Ok(ResultSet {
        columns,
        rows,
        last_insert_id,
    })
}

fn decode_row(columns: &[Column], row: Vec<NativeValue>, index: usize) -> Result<Vec<Value>> {
    if row.len() != columns.len() {
        return Err(Error::encoding(
            format!("rows[{index}]"),
            format!("row has {} cells for {} columns", row.len(), columns.len()),
        ));
    }
    row.into_iter()
        .zip(columns)
        .map(|(cell, col)| decode(cell, &col.declared_type, &format!("rows[{index}].{}", col.name)))
        .collect()
}

/// Decode one native value against a declared column type
pub fn decode(native: NativeValue, declared: &ColumnType, path: &str) -> Result<Value> {
    match native {
        NativeValue::Null => Ok(Value::Null),
        NativeValue::Bool(b) => Ok(Value::Bool(b)),
        NativeValue::Int32(i) => decode_int(i as i64, declared),
        NativeValue::Int64(i) => decode_int(i, declared),
        NativeValue::Double(f) => Ok(Value::Float(f)),
        NativeValue::Numeric(s) => match declared {
            ColumnType::Float | ColumnType::Double => s
                .parse()
                .map(Value::Float)
                .map_err(|_| Error::encoding(path, format!("`{s}` is not a number"))),
            _ => Ok(Value::Decimal(s)),
        },
        NativeValue::Text(s) => decode_text(s, declared, path),
        NativeValue::Bytes(b) => Ok(Value::Bytes(b)),
        NativeValue::Json(v) => Ok(Value::Json(v.to_string())),
        NativeValue::DateTime { secs, nanos } => Timestamp::new(secs, nanos)
            .map(Value::DateTime)
            .ok_or_else(|| Error::encoding(path, format!("nanoseconds {nanos} out of range"))),
        NativeValue::Array(items) => {
            let element = declared.element();
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| decode(item, element, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
    }
}

fn decode_int(i: i64, declared: &ColumnType) -> Result<Value> {
    Ok(match declared {
        ColumnType::Boolean => Value::Bool(i != 0),
        ColumnType::Numeric => Value::Decimal(i.to_string()),
        ColumnType::Float | ColumnType::Double => Value::Float(i as f64),
        _ => Value::Int(i),
    })
}

fn decode_text(s: String, declared: &ColumnType, path: &str) -> Result<Value> {
    match declared {
        ColumnType::DateTime | ColumnType::Date => Timestamp::parse_rfc3339(&s)
            .map(Value::DateTime)
            .ok_or_else(|| Error::encoding(path, format!("`{s}` is not an RFC 3339 datetime"))),
        ColumnType::Numeric if is_decimal_literal(s.trim()) => Ok(Value::Decimal(s)),
        ColumnType::Numeric => Err(Error::encoding(path, format!("`{s}` is not a decimal"))),
        ColumnType::Int32 | ColumnType::Int64 => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| Error::encoding(path, format!("`{s}` is not an integer"))),
        ColumnType::Float | ColumnType::Double => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| Error::encoding(path, format!("`{s}` is not a number"))),
        ColumnType::Boolean => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::encoding(path, format!("`{s}` is not a boolean"))),
        },
        ColumnType::Json => Ok(Value::Json(s)),
        _ => Ok(Value::String(s)),
    }
}
