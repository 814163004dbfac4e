use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ════════════════════════════════════════════════════════════════
//  Row records (column store)
// ════════════════════════════════════════════════════════════════

/// Target of one body field in a row store: `(family, qualifier)`.
///
/// Declared once at stage configuration time, as an ordered list
/// (cell definition *i* receives body field *i*).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellDefine {
    pub family: String,
    pub qualifier: String,
}

impl CellDefine {
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Column name in `family:qualifier` notation.
    pub fn column(&self) -> String {
        format!("{}:{}", self.family, self.qualifier)
    }
}

/// One stored cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: String,
}

impl Cell {
    /// Column name in `family:qualifier` notation.
    pub fn column(&self) -> String {
        format!("{}:{}", self.family, self.qualifier)
    }
}

/// A row: key + cells in cell-definition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub row_key: String,
    pub cells: Vec<Cell>,
}

// ════════════════════════════════════════════════════════════════
//  Statement records (wide-column store)
// ════════════════════════════════════════════════════════════════

/// Column value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Text(String),
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Null,
}

impl From<&Value> for CqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CqlValue::Null,
            Value::Bool(b) => CqlValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CqlValue::BigInt(i),
                None => CqlValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => CqlValue::Text(s.clone()),
            // Nested structures are stored as their JSON text.
            other => CqlValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            CqlValue::BigInt(i) => write!(f, "{i}"),
            CqlValue::Double(d) => write!(f, "{d}"),
            CqlValue::Boolean(b) => write!(f, "{b}"),
            CqlValue::Null => f.write_str("null"),
        }
    }
}

/// Parameterized write statement bound to concrete values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// Statement text with `?` placeholders. Shared with the prepared statement.
    pub cql: Arc<str>,
    pub values: Vec<CqlValue>,
}

// ════════════════════════════════════════════════════════════════
//  Key-value records (cache)
// ════════════════════════════════════════════════════════════════

/// Single `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}
