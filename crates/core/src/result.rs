//! Decoded query results
//!
//! A `ResultSet` is the engine-level shape of what a driver returned: column
//! metadata, rows of engine values in column order, and the last inserted id
//! when the statement produced one.

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value};

/// Declared type of a result column, as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// Single precision float
    Float,
    /// Double precision float
    Double,
    /// Arbitrary precision decimal, carried as text
    Numeric,
    /// Boolean
    Boolean,
    /// Single character
    Character,
    /// Text
    Text,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date and time
    DateTime,
    /// JSON document
    Json,
    /// Enum label
    Enum,
    /// Binary data
    Bytes,
    /// UUID
    Uuid,
    /// Homogeneous list of the inner type
    List(Box<ColumnType>),
    /// Backend gave no usable declaration
    Unknown,
}

impl ColumnType {
    /// Element type for list columns, the type itself otherwise
    pub fn element(&self) -> &ColumnType {
        match self {
            ColumnType::List(inner) => inner,
            other => other,
        }
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name as returned by the backend
    pub name: String,
    /// Declared type used when decoding cells of this column
    pub declared_type: ColumnType,
}

impl Column {
    /// Create column metadata
    pub fn new(name: impl Into<String>, declared_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            declared_type,
        }
    }
}

/// Decoded rows from one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    /// Column metadata, in result order
    pub columns: Vec<Column>,
    /// Rows; each row holds one value per column
    pub rows: Vec<Vec<Value>>,
    /// Identifier generated by an insert, if the backend reported one
    pub last_insert_id: Option<String>,
}

impl ResultSet {
    /// Create a result set without a last insert id
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        ResultSet {
            columns,
            rows,
            last_insert_id: None,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in result order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Append another result set's rows (used when a chunked query is merged)
    ///
    /// The last insert id of the appended set wins when present.
    pub fn append(&mut self, other: ResultSet) {
        if self.columns.is_empty() {
            self.columns = other.columns;
        }
        self.rows.extend(other.rows);
        if other.last_insert_id.is_some() {
            self.last_insert_id = other.last_insert_id;
        }
    }

    /// Turn each row into a record keyed by column name
    ///
    /// When two columns share a name the later one wins.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: Record = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect();
                Value::Record(record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> ResultSet {
        ResultSet::new(
            vec![
                Column::new("id", ColumnType::Int64),
                Column::new("name", ColumnType::Text),
            ],
            vec![
                vec![Value::Int(1), Value::from("ada")],
                vec![Value::Int(2), Value::from("grace")],
            ],
        )
    }

    #[test]
    fn test_to_records_keys_by_column_name() {
        let records = users().to_records();
        assert_eq!(records.len(), 2);
        let first = records[0].as_record().unwrap();
        assert_eq!(first.get("id"), Some(&Value::Int(1)));
        assert_eq!(first.get("name"), Some(&Value::from("ada")));
    }

    #[test]
    fn test_append_merges_rows_and_keeps_latest_insert_id() {
        let mut a = users();
        a.last_insert_id = Some("2".into());
        let mut b = users();
        b.last_insert_id = Some("7".into());
        a.append(b);
        assert_eq!(a.len(), 4);
        assert_eq!(a.last_insert_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_append_into_empty_takes_columns() {
        let mut empty = ResultSet::default();
        empty.append(users());
        assert_eq!(empty.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn test_list_element_type() {
        let t = ColumnType::List(Box::new(ColumnType::Int32));
        assert_eq!(t.element(), &ColumnType::Int32);
        assert_eq!(ColumnType::Text.element(), &ColumnType::Text);
    }
}
