//! Database values and query results.

use serde::{Deserialize, Serialize};

/// Value bound to a parameter or read back from a result column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Blob(Vec<u8>),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// Integer view. Decimals convert only when they are whole and in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Integer(value) => Some(*value),
            DbValue::Boolean(value) => Some(i64::from(*value)),
            DbValue::Decimal(value) => {
                let in_range = *value >= i64::MIN as f64 && *value < i64::MAX as f64;
                (value.fract() == 0.0 && in_range).then_some(*value as i64)
            }
            DbValue::String(value) => value.trim().parse().ok(),
            DbValue::Blob(_) | DbValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DbValue::Integer(value) => Some(*value as f64),
            DbValue::Boolean(value) => Some(f64::from(u8::from(*value))),
            DbValue::Decimal(value) => Some(*value),
            DbValue::String(value) => value.trim().parse().ok(),
            DbValue::Blob(_) | DbValue::Null => None,
        }
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        DbValue::Integer(value)
    }
}

impl From<i32> for DbValue {
    fn from(value: i32) -> Self {
        DbValue::Integer(i64::from(value))
    }
}

impl From<f64> for DbValue {
    fn from(value: f64) -> Self {
        DbValue::Decimal(value)
    }
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        DbValue::Boolean(value)
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        DbValue::String(value)
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        DbValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(value: Vec<u8>) -> Self {
        DbValue::Blob(value)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DbValue::Null)
    }
}

impl From<libsql::Value> for DbValue {
    fn from(value: libsql::Value) -> Self {
        match value {
            libsql::Value::Null => DbValue::Null,
            libsql::Value::Integer(value) => DbValue::Integer(value),
            libsql::Value::Real(value) => DbValue::Decimal(value),
            libsql::Value::Text(value) => DbValue::String(value),
            libsql::Value::Blob(value) => DbValue::Blob(value),
        }
    }
}

impl From<&DbValue> for libsql::Value {
    fn from(value: &DbValue) -> Self {
        match value {
            DbValue::String(value) => libsql::Value::Text(value.clone()),
            DbValue::Blob(value) => libsql::Value::Blob(value.clone()),
            DbValue::Integer(value) => libsql::Value::Integer(*value),
            DbValue::Decimal(value) => libsql::Value::Real(*value),
            DbValue::Boolean(value) => libsql::Value::Integer(i64::from(*value)),
            DbValue::Null => libsql::Value::Null,
        }
    }
}

/// Rows returned by a query, with column names in select order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbValue>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Value at `row` for the named column.
    pub fn get(&self, row: usize, column: &str) -> Option<&DbValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|values| values.get(idx))
    }

    /// First column of the first row, `None` when absent or NULL.
    pub fn scalar(&self) -> Option<&DbValue> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .filter(|value| !value.is_null())
    }
}
