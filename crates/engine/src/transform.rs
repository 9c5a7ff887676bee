//! In-memory transforms over materialized values
//!
//! These implement the plan's relational post-processing without help from
//! the backend: projecting fields, stitching child records onto parents,
//! list arithmetic, record initialization and the final data mapping into
//! the caller-facing shape.
//!
//! Shape mismatches in the data (a scalar where records were expected, a
//! missing column) are reported as `PlanAssertion` errors.

use rustc_hash::{FxHashMap, FxHashSet};
use sluice_core::{is_decimal_literal, Error, Record, Result, Timestamp, Value};
use std::collections::BTreeMap;

use crate::plan::{FieldOperation, InMemoryOps, JoinExpression, ResultNode, ResultType};

fn shape_error(message: impl Into<String>) -> Error {
    Error::assertion(message)
}

fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Record(record) => Ok(record),
        other => Err(shape_error(format!("expected a record, got {}", other.type_name()))),
    }
}

/// Stable key of a record over `fields`
pub fn record_key(record: &Record, fields: &[String]) -> String {
    let parts: Vec<serde_json::Value> = fields
        .iter()
        .map(|f| record.get(f).map(Value::to_json).unwrap_or(serde_json::Value::Null))
        .collect();
    serde_json::Value::Array(parts).to_string()
}

// ============================================================================
// Lists
// ============================================================================

/// Project `field` out of a record or each record of a list
pub fn map_field(value: Value, field: &str) -> Value {
    match value {
        Value::List(_) | Value::Cursor(_) => {
            Value::List(value.into_list().into_iter().map(|v| map_field(v, field)).collect())
        }
        Value::Record(mut record) => record.remove(field).unwrap_or(Value::Null),
        other => other,
    }
}

/// Flatten values into one list
pub fn concat(parts: Vec<Value>) -> Value {
    Value::List(parts.into_iter().flat_map(Value::into_list).collect())
}

/// Add numbers; integers stay integers unless they overflow
pub fn sum(parts: &[Value]) -> Result<Value> {
    let mut exact: Option<i64> = Some(0);
    let mut approx = 0.0;
    for part in parts {
        let f = part
            .to_f64()
            .filter(|_| !matches!(part, Value::Bool(_)))
            .ok_or_else(|| shape_error(format!("expected a number, got {}", part.type_name())))?;
        approx += f;
        exact = match (exact, part) {
            (Some(acc), Value::Int(i)) => acc.checked_add(*i),
            _ => None,
        };
    }
    Ok(exact.map(Value::Int).unwrap_or(Value::Float(approx)))
}

/// Items of `from` that are not in `to`
pub fn diff(from: Value, to: &Value) -> Value {
    let exclude: FxHashSet<String> = match to {
        Value::List(items) => items.iter().map(|v| v.to_json().to_string()).collect(),
        Value::Cursor(cursor) => cursor.records().iter().map(|v| v.to_json().to_string()).collect(),
        other => std::iter::once(other.to_json().to_string()).collect(),
    };
    Value::List(
        from.into_list()
            .into_iter()
            .filter(|item| !exclude.contains(&item.to_json().to_string()))
            .collect(),
    )
}

/// Zero or one element
pub fn unique(value: Value) -> Result<Value> {
    match value {
        Value::List(_) | Value::Cursor(_) => {
            let mut items = value.into_list();
            if items.len() > 1 {
                return Err(shape_error(format!("expected zero or one element, got {}", items.len())));
            }
            Ok(items.pop().unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Reverse a list; other values pass through
pub fn reverse(value: Value) -> Value {
    match value {
        Value::List(_) | Value::Cursor(_) => {
            let mut items = value.into_list();
            items.reverse();
            Value::List(items)
        }
        other => other,
    }
}

/// Apply in-memory skip / take / distinct / reverse
pub fn process(value: Value, ops: &InMemoryOps) -> Result<Value> {
    match value {
        Value::List(_) | Value::Cursor(_) => {
            let mut items = value.into_list();
            if ops.reverse {
                items.reverse();
            }
            if let Some(fields) = &ops.distinct {
                let mut seen = FxHashSet::default();
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    let key = match &item {
                        Value::Record(record) => record_key(record, fields),
                        other => other.to_json().to_string(),
                    };
                    if seen.insert(key) {
                        kept.push(item);
                    }
                }
                items = kept;
            }
            let items = items
                .into_iter()
                .skip(ops.skip.unwrap_or(0))
                .take(ops.take.unwrap_or(usize::MAX))
                .map(|item| process_nested(item, &ops.nested))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(items))
        }
        other => process_nested(other, &ops.nested),
    }
}

fn process_nested(value: Value, nested: &BTreeMap<String, InMemoryOps>) -> Result<Value> {
    if nested.is_empty() {
        return Ok(value);
    }
    let Value::Record(mut record) = value else {
        return Ok(value);
    };
    for (field, ops) in nested {
        if let Some(inner) = record.remove(field) {
            record.insert(field.clone(), process(inner, ops)?);
        }
    }
    Ok(Value::Record(record))
}

// ============================================================================
// Joins
// ============================================================================

/// Attach child records to their parents
///
/// Every parent receives `parent_field`: a list of matching children, or
/// for a unique relation the matching child or null. A null parent stays
/// null.
pub fn attach_children(parent: Value, children: Vec<(&JoinExpression, Value)>) -> Result<Value> {
    let single = match &parent {
        Value::Null => return Ok(Value::Null),
        Value::Record(_) => true,
        Value::List(_) | Value::Cursor(_) => false,
        other => return Err(shape_error(format!("expected parent records, got {}", other.type_name()))),
    };
    let mut parents: Vec<Record> = parent
        .into_list()
        .into_iter()
        .map(into_record)
        .collect::<Result<_>>()?;

    for (join, child_records) in children {
        let parent_keys: Vec<String> = join.on.iter().map(|(p, _)| p.clone()).collect();
        let child_keys: Vec<String> = join.on.iter().map(|(_, c)| c.clone()).collect();

        let mut by_key: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, record) in parents.iter_mut().enumerate() {
            by_key.entry(record_key(record, &parent_keys)).or_default().push(i);
            let empty = if join.is_relation_unique {
                Value::Null
            } else {
                Value::List(Vec::new())
            };
            record.insert(join.parent_field.clone(), empty);
        }

        for child in child_records.into_list() {
            if child.is_null() {
                continue;
            }
            let child = into_record(child)?;
            let key = record_key(&child, &child_keys);
            let Some(targets) = by_key.get(&key) else {
                continue;
            };
            for &i in targets {
                let slot = parents[i]
                    .entry(join.parent_field.clone())
                    .or_insert(Value::Null);
                if join.is_relation_unique {
                    *slot = Value::Record(child.clone());
                } else if let Value::List(items) = slot {
                    items.push(Value::Record(child.clone()));
                }
            }
        }
    }

    let mut records: Vec<Value> = parents.into_iter().map(Value::Record).collect();
    if single {
        Ok(records.pop().unwrap_or(Value::Null))
    } else {
        Ok(Value::List(records))
    }
}

// ============================================================================
// Records
// ============================================================================

/// Apply one field operation to the current field value
pub fn apply_field_operation(op: &FieldOperation, current: Value, operand: Value) -> Result<Value> {
    match op {
        FieldOperation::Set(_) => Ok(operand),
        FieldOperation::Add(_) => arith(&current, &operand, "add", i64::checked_add, |a, b| a + b),
        FieldOperation::Subtract(_) => arith(&current, &operand, "subtract", i64::checked_sub, |a, b| a - b),
        FieldOperation::Multiply(_) => arith(&current, &operand, "multiply", i64::checked_mul, |a, b| a * b),
        FieldOperation::Divide(_) => {
            let (a, b) = numbers(&current, &operand, "divide")?;
            if b == 0.0 {
                return Ok(Value::Null);
            }
            if let (Value::Int(x), Value::Int(y)) = (&current, &operand) {
                if x.checked_rem(*y) == Some(0) {
                    if let Some(q) = x.checked_div(*y) {
                        return Ok(Value::Int(q));
                    }
                }
            }
            Ok(Value::Float(a / b))
        }
    }
}

fn arith(
    current: &Value,
    operand: &Value,
    op: &str,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (current, operand) {
        if let Some(v) = int(*a, *b) {
            return Ok(Value::Int(v));
        }
    }
    let (a, b) = numbers(current, operand, op)?;
    Ok(Value::Float(float(a, b)))
}

fn numbers(a: &Value, b: &Value, op: &str) -> Result<(f64, f64)> {
    let num = |v: &Value| {
        v.to_f64()
            .filter(|_| !matches!(v, Value::Bool(_)))
            .ok_or_else(|| shape_error(format!("cannot {op}: expected a number, got {}", v.type_name())))
    };
    Ok((num(a)?, num(b)?))
}

/// The record a `MapRecord` node starts from
pub fn record_or_empty(value: Value) -> Result<Record> {
    match value {
        Value::Null => Ok(Record::new()),
        other => into_record(other),
    }
}

// ============================================================================
// Data mapping
// ============================================================================

/// Shape raw records into the caller-facing result
pub fn data_map(value: Value, structure: &ResultNode, enums: &BTreeMap<String, BTreeMap<String, String>>) -> Result<Value> {
    match structure {
        ResultNode::AffectedRows => match value {
            Value::Int(n) => Ok(Value::Record([("count".to_string(), Value::Int(n))].into_iter().collect())),
            other => Err(shape_error(format!("expected an affected rows count, got {}", other.type_name()))),
        },
        ResultNode::Object { fields, skip_nulls, .. } => map_array_or_object(value, fields, enums, *skip_nulls),
        ResultNode::Value { result_type, .. } => map_value(value, "<result>", result_type, enums),
    }
}

fn map_array_or_object(
    value: Value,
    fields: &BTreeMap<String, ResultNode>,
    enums: &BTreeMap<String, BTreeMap<String, String>>,
    skip_nulls: bool,
) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::List(_) | Value::Cursor(_) => value
            .into_list()
            .into_iter()
            .filter(|row| !(skip_nulls && row.is_null()))
            .map(|row| map_object(into_record(row)?, fields, enums))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Value::Record(record) => map_object(record, fields, enums),
        Value::String(text) | Value::Json(text) => {
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|_| shape_error("expected an array or object, got a string that is not valid JSON"))?;
            map_array_or_object(Value::from(parsed), fields, enums, skip_nulls)
        }
        other => Err(shape_error(format!("expected an array or an object, got {}", other.type_name()))),
    }
}

fn map_object(
    mut record: Record,
    fields: &BTreeMap<String, ResultNode>,
    enums: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Value> {
    let mut out = Record::new();
    for (name, node) in fields {
        let mapped = match node {
            ResultNode::AffectedRows => {
                return Err(shape_error(format!("unexpected affected rows mapping for field '{name}'")))
            }
            ResultNode::Object {
                serialized_name,
                fields,
                skip_nulls,
            } => {
                let target = match serialized_name {
                    Some(source) => record
                        .remove(source)
                        .ok_or_else(|| shape_error(format!("missing data field (object): '{source}'")))?,
                    None => Value::Record(record.clone()),
                };
                map_array_or_object(target, fields, enums, *skip_nulls)?
            }
            ResultNode::Value { db_name, result_type } => {
                let raw = record
                    .get(db_name)
                    .cloned()
                    .ok_or_else(|| shape_error(format!("missing data field (value): '{db_name}'")))?;
                map_value(raw, db_name, result_type, enums)?
            }
        };
        out.insert(name.clone(), mapped);
    }
    Ok(Value::Record(out))
}

fn map_value(
    value: Value,
    column: &str,
    result_type: &ResultType,
    enums: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Value> {
    if value.is_null() {
        return Ok(match result_type {
            ResultType::Array(_) => Value::List(Vec::new()),
            _ => Value::Null,
        });
    }
    let unexpected = |expected: &str, got: &Value| {
        shape_error(format!("expected {expected} in column '{column}', got {}", got.type_name()))
    };

    match result_type {
        ResultType::Any => Ok(value),
        ResultType::String => match value {
            Value::String(_) => Ok(value),
            other => Err(unexpected("a string", &other)),
        },
        ResultType::Int => match value {
            Value::Int(_) => Ok(value),
            Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
            Value::String(ref s) | Value::Decimal(ref s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Value::Int(i));
                }
                match s.parse::<f64>() {
                    Ok(f) if f.is_finite() && f.abs() < 9.007_199_254_740_992e15 => Ok(Value::Int(f.trunc() as i64)),
                    _ => Err(unexpected("an integer", &value)),
                }
            }
            other => Err(unexpected("an integer", &other)),
        },
        ResultType::BigInt => match value {
            Value::Int(_) => Ok(value),
            Value::String(s) | Value::Decimal(s) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) if is_decimal_literal(s.trim()) && !s.contains(|c| matches!(c, '.' | 'e' | 'E')) => {
                    Ok(Value::Decimal(s.trim().to_string()))
                }
                Err(_) => Err(shape_error(format!("expected a bigint in column '{column}', got '{s}'"))),
            },
            other => Err(unexpected("a bigint", &other)),
        },
        ResultType::Float => match value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::String(ref s) | Value::Decimal(ref s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| unexpected("a float", &value)),
            other => Err(unexpected("a float", &other)),
        },
        ResultType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            Value::String(ref s) => match s.as_str() {
                "true" | "TRUE" | "1" => Ok(Value::Bool(true)),
                "false" | "FALSE" | "0" => Ok(Value::Bool(false)),
                _ => Err(unexpected("a boolean", &value)),
            },
            Value::Bytes(bytes) => Ok(Value::Bool(bytes.iter().any(|b| *b != 0))),
            other => Err(unexpected("a boolean", &other)),
        },
        ResultType::Decimal => match value {
            Value::Decimal(_) => Ok(value),
            Value::Int(i) => Ok(Value::Decimal(i.to_string())),
            Value::Float(f) if f.is_finite() => Ok(Value::Decimal(f.to_string())),
            Value::String(s) if is_decimal_literal(s.trim()) => Ok(Value::Decimal(s.trim().to_string())),
            other => Err(unexpected("a decimal", &other)),
        },
        ResultType::Date => match value {
            Value::DateTime(_) => Ok(value),
            Value::String(ref s) => parse_instant(s)
                .map(Value::DateTime)
                .ok_or_else(|| unexpected("a date", &value)),
            other => Err(unexpected("a date", &other)),
        },
        ResultType::Time => match value {
            Value::DateTime(_) => Ok(value),
            Value::String(ref s) => parse_instant(&format!("1970-01-01 {}", s.trim()))
                .or_else(|| parse_instant(&format!("1970-01-01T{}", s.trim())))
                .map(Value::DateTime)
                .ok_or_else(|| unexpected("a time", &value)),
            other => Err(unexpected("a time", &other)),
        },
        ResultType::Array(inner) => {
            let items = match value {
                Value::List(_) | Value::Cursor(_) => value.into_list(),
                Value::String(s) | Value::Json(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                    Ok(json @ serde_json::Value::Array(_)) => Value::from(json).into_list(),
                    _ => return Err(shape_error(format!("expected an array in column '{column}'"))),
                },
                other => return Err(unexpected("an array", &other)),
            };
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| map_value(item, &format!("{column}[{i}]"), inner, enums))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        ResultType::Object => Ok(Value::Json(value.to_json().to_string())),
        ResultType::Json => match value {
            Value::Json(_) => Ok(value),
            Value::String(s) => Ok(Value::Json(s)),
            other => Ok(Value::Json(other.to_json().to_string())),
        },
        ResultType::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            Value::String(ref s) if s.starts_with("\\x") => decode_hex(&s[2..])
                .map(Value::Bytes)
                .ok_or_else(|| unexpected("a byte array", &value)),
            Value::List(ref items) => items
                .iter()
                .map(|v| v.as_int().and_then(|i| u8::try_from(i).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(|| unexpected("a byte array", &value)),
            other => Err(unexpected("a byte array", &other)),
        },
        ResultType::Enum(name) => {
            let table = enums
                .get(name)
                .ok_or_else(|| shape_error(format!("unknown enum '{name}'")))?;
            let key = match &value {
                Value::String(s) => s.clone(),
                other => other.to_json().to_string(),
            };
            table
                .get(&key)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| shape_error(format!("value '{key}' not found in enum '{name}'")))
        }
    }
}

fn parse_instant(text: &str) -> Option<Timestamp> {
    Timestamp::parse_rfc3339(text).or_else(|| Timestamp::parse_rfc3339(&format!("{}Z", text.trim())))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
