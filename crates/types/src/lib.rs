use std::cmp::Ordering;

/// Declared column type. Fixed at `CREATE TABLE` time; schemata are
/// immutable for the life of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int32,
    Int64,
    Bool,
    Float64,
    Text,
    Bytes,
}

impl SqlType {
    /// Fixed on-disk width in bytes for scalar types; `None` for
    /// variable-length types (Text/Bytes), which are length-prefixed.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            SqlType::Int32 => Some(4),
            SqlType::Int64 => Some(8),
            SqlType::Bool => Some(1),
            SqlType::Float64 => Some(8),
            SqlType::Text | SqlType::Bytes => None,
        }
    }
}

/// A non-null cell value. Nullability is carried alongside a `Value` by
/// the row representation (`Option<Value>`), not as a `Value` variant —
/// a column's declared type never changes shape depending on whether a
/// particular row's cell happens to be null.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Bool(bool),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The `SqlType` this value's shape corresponds to.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Int32(_) => SqlType::Int32,
            Value::Int64(_) => SqlType::Int64,
            Value::Bool(_) => SqlType::Bool,
            Value::Float64(_) => SqlType::Float64,
            Value::Text(_) => SqlType::Text,
            Value::Bytes(_) => SqlType::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widens `Int32` to `i64`; returns the value as-is for `Int64`.
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Ordering between two values of the same variant; `None` for
    /// cross-type comparisons.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Float64(a), Value::Float64(b)) => Some(a == b),
            _ => self.cmp_same_type(other).map(|ord| ord == Ordering::Equal),
        }
    }
}
