//! Rules checked by `If` and `Validate` nodes

use sluice_core::{Error, Result, Value};

use crate::plan::Rule;

/// Rows held by a value: list length, 0 for null, 1 for anything else
pub fn row_count(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::List(items) => items.len(),
        Value::Cursor(cursor) => cursor.row_count(),
        _ => 1,
    }
}

/// Whether `rule` holds for `value`
pub fn satisfies(value: &Value, rule: &Rule) -> bool {
    match rule {
        Rule::RowCountEq(n) => row_count(value) == *n,
        Rule::RowCountNeq(n) => row_count(value) != *n,
        Rule::AffectedRowCountEq(n) => value.as_int().and_then(|v| u64::try_from(v).ok()) == Some(*n),
        Rule::Never => false,
    }
}

/// Fail with `message` unless every rule holds
pub fn validate(value: &Value, rules: &[Rule], message: &str) -> Result<()> {
    match rules.iter().find(|rule| !satisfies(value, rule)) {
        Some(rule) => Err(Error::assertion(format!("{message} (rule {rule:?} failed)"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_rules() {
        let two = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(satisfies(&two, &Rule::RowCountEq(2)));
        assert!(satisfies(&two, &Rule::RowCountNeq(0)));
        assert!(satisfies(&Value::Null, &Rule::RowCountEq(0)));
        assert!(satisfies(&Value::from("x"), &Rule::RowCountEq(1)));
    }

    #[test]
    fn test_affected_rows_and_never() {
        assert!(satisfies(&Value::Int(3), &Rule::AffectedRowCountEq(3)));
        assert!(!satisfies(&Value::Int(-1), &Rule::AffectedRowCountEq(1)));
        assert!(!satisfies(&Value::Null, &Rule::Never));
    }

    #[test]
    fn test_validate_reports_message() {
        let err = validate(&Value::List(vec![]), &[Rule::RowCountNeq(0)], "record to update not found").unwrap_err();
        assert!(matches!(err, Error::PlanAssertion { .. }));
        assert!(err.to_string().contains("record to update not found"));
        assert!(validate(&Value::Int(1), &[], "unused").is_ok());
    }
}
