use std::collections::BTreeMap;

/// SqlValue is a parameter or column value in the narrow type system the
/// cache schema needs.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Null,
}

impl SqlValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlValue::Integer(_) => "Integer",
            SqlValue::Float(_) => "Float",
            SqlValue::Text(_) => "Text",
            SqlValue::Blob(_) => "Blob",
            SqlValue::Bool(_) => "Bool",
            SqlValue::Null => "Null",
        }
    }
}

/// A Statement is a SQL command with named parameters.
///
/// The SQL text comes from the connection factory and already carries the
/// dialect's parameter prefix; parameters are stored here under their bare
/// names and the driver adapter binds them using its own prefix.
#[derive(Clone, Debug)]
pub struct Statement {
    pub sql: String,
    pub params: BTreeMap<String, SqlValue>,
}

impl Statement {
    /// new returns a Statement with the given SQL and no parameters.
    pub fn new<T: Into<String>>(sql: T) -> Self {
        Statement {
            sql: sql.into(),
            params: Default::default(),
        }
    }

    /// add_param binds a parameter by bare name.
    pub fn add_param<T>(&mut self, name: &str, value: &T)
    where
        T: ToSqlValue + ?Sized,
    {
        self.params.insert(name.to_string(), value.to_sql_value());
    }
}

/// ToSqlValue converts a Rust value into a bindable [`SqlValue`].
pub trait ToSqlValue {
    fn to_sql_value(&self) -> SqlValue;
}

impl<T> ToSqlValue for &T
where
    T: ToSqlValue + ?Sized,
{
    fn to_sql_value(&self) -> SqlValue {
        (**self).to_sql_value()
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Float(*self)
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Bool(*self)
    }
}

impl ToSqlValue for str {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }
}

impl ToSqlValue for String {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl ToSqlValue for [u8] {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Blob(self.clone())
    }
}

impl<T> ToSqlValue for Option<T>
where
    T: ToSqlValue,
{
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}
