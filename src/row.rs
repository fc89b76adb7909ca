use std::collections::HashMap;
use std::sync::Arc;

use crate::statement::SqlValue;

/// Row is one result row, with column values addressable by index or name.
#[derive(Clone, Debug)]
pub struct Row {
    index: Arc<HashMap<String, usize>>,
    values: Vec<SqlValue>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid column index: index={index}, length={length}")]
    InvalidColumnIndex { index: usize, length: usize },

    #[error("no column found: name={0}")]
    NoColumnFound(String),

    #[error("{column}: wanted={wanted}, actual={actual}")]
    KindMismatch {
        column: String,
        wanted: &'static str,
        actual: &'static str,
    },
}

impl Row {
    pub fn new(index: Arc<HashMap<String, usize>>, values: Vec<SqlValue>) -> Row {
        Row { index, values }
    }

    pub fn column<T>(&self, column_index: usize) -> Result<T, Error>
    where
        T: TryFromValue,
    {
        let value = self
            .values
            .get(column_index)
            .ok_or(Error::InvalidColumnIndex {
                index: column_index,
                length: self.values.len(),
            })?;
        let name = self
            .index
            .iter()
            .find(|(_, i)| **i == column_index)
            .map(|(n, _)| n.as_str())
            .unwrap_or("?");
        T::try_from(value, name)
    }

    pub fn column_by_name<T>(&self, column_name: &str) -> Result<T, Error>
    where
        T: TryFromValue,
    {
        match self.index.get(column_name) {
            Some(column_index) => {
                T::try_from(&self.values[*column_index], column_name)
            }
            None => Err(Error::NoColumnFound(column_name.to_string())),
        }
    }
}

// Not the std TryFrom: the column name must travel with the conversion so
// mismatches can say which column was at fault.
pub trait TryFromValue: Sized {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error>;
}

fn mismatch(column: &str, wanted: &'static str, actual: &SqlValue) -> Error {
    Error::KindMismatch {
        column: column.to_string(),
        wanted,
        actual: actual.kind_name(),
    }
}

impl TryFromValue for i64 {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Integer(i) => Ok(*i),
            v => Err(mismatch(column, "Integer", v)),
        }
    }
}

impl TryFromValue for f64 {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Float(f) => Ok(*f),
            SqlValue::Integer(i) => Ok(*i as f64),
            v => Err(mismatch(column, "Float", v)),
        }
    }
}

impl TryFromValue for bool {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            // Backends without a boolean type store 0/1.
            SqlValue::Integer(0) => Ok(false),
            SqlValue::Integer(_) => Ok(true),
            v => Err(mismatch(column, "Bool", v)),
        }
    }
}

impl TryFromValue for String {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            v => Err(mismatch(column, "Text", v)),
        }
    }
}

impl TryFromValue for Vec<u8> {
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Blob(b) => Ok(b.clone()),
            v => Err(mismatch(column, "Blob", v)),
        }
    }
}

impl<T> TryFromValue for Option<T>
where
    T: TryFromValue,
{
    fn try_from(value: &SqlValue, column: &str) -> Result<Self, Error> {
        match value {
            SqlValue::Null => Ok(None),
            v => Ok(Some(T::try_from(v, column)?)),
        }
    }
}
