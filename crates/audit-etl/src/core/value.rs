//! Cell values as delivered by a source cursor.

use serde::{Deserialize, Serialize};

/// A raw cell read from a source row.
///
/// Live cursors hand back whatever the driver produced: strings (often
/// locale-formatted numbers), native numbers, binary data or NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// SQL NULL.
    Null,

    /// Native integer value.
    Integer(i64),

    /// Native floating point value.
    Real(f64),

    /// Text as reported by the driver.
    Text(String),

    /// Binary data.
    Blob(Vec<u8>),
}

/// One source row, positionally aligned with the table columns.
pub type Row = Vec<CellValue>;

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Integer(i64::from(v))
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Real(v)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(v: Vec<u8>) -> Self {
        CellValue::Blob(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(CellValue::Null, Into::into)
    }
}
