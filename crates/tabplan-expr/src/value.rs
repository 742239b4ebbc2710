use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

/// Canonical text form used when datetimes are rendered or converted to strings.
pub const DATETIME_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single typed cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Boolean(bool),
    String(Arc<str>),
    DateTime(NaiveDateTime),
}

/// Logical column types.
///
/// `Null` is the type of a column in which no non-null value has been observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Null,
    Int,
    Float,
    Boolean,
    String,
    DateTime,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Null => "null",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::DateTime => "datetime",
        }
    }

    /// The type both `self` and `other` values can be stored as, if any.
    ///
    /// `Null` unifies with everything and integers widen to floats.
    pub fn unify(self, other: ColumnType) -> Option<ColumnType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ColumnType::Null, t) | (t, ColumnType::Null) => Some(t),
            (ColumnType::Int, ColumnType::Float) | (ColumnType::Float, ColumnType::Int) => {
                Some(ColumnType::Float)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::String(_) => ColumnType::String,
            Value::DateTime(_) => ColumnType::DateTime,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.column_type().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value (integers widen to `f64`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen an integer to a float so it can live in a `Float` column.
    pub fn widen_to(self, column_type: ColumnType) -> Value {
        match (self, column_type) {
            (Value::Int(v), ColumnType::Float) => Value::Float(v as f64),
            (other, _) => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::DateTime(v) => write!(f, "{}", v.format(DATETIME_DISPLAY_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
