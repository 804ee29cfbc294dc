use super::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// ValueType is the declared element type of a Column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    #[default]
    Text,
    Integer,
    Number,
    Boolean,
    Any,
}

/// Value is the content of a single Column cell.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl Value {
    /// Default value of a Column of type `ty` which was never assigned.
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::Text => Value::Text(String::new()),
            ValueType::Integer => Value::Integer(0),
            ValueType::Number => Value::Number(0.0),
            ValueType::Boolean | ValueType::Any => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A value is empty if it's null, numerically zero, or an empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(_) => false,
            Value::Integer(i) => *i == 0,
            Value::Number(n) => *n == 0.0,
            Value::Text(s) => s.is_empty(),
        }
    }

    /// Numeric view of the value, parsing text where it looks like a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Compare two values, numerically if both have a numeric view
    /// and by their textual rendering otherwise. Nulls sort first.
    pub fn loose_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => match (self.as_number(), other.as_number()) {
                (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }

    pub fn loose_eq(&self, other: &Value) -> bool {
        self.loose_cmp(other) == Ordering::Equal
    }

    /// Convert the value into the representation of `ty`.
    pub fn coerce(&self, ty: ValueType) -> Result<Value, Error> {
        let err = || Error::Coercion {
            value: self.clone(),
            to: ty,
        };

        let out = match (ty, self) {
            (_, Value::Null) | (ValueType::Any, _) => self.clone(),
            (ValueType::Text, v) => Value::Text(v.to_string()),

            (ValueType::Integer, Value::Integer(_)) => self.clone(),
            (ValueType::Integer, Value::Bool(b)) => Value::Integer(*b as i64),
            (ValueType::Integer, Value::Number(n)) if n.fract() == 0.0 => Value::Integer(*n as i64),
            (ValueType::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => match s.trim().parse::<f64>() {
                    Ok(n) if n.fract() == 0.0 => Value::Integer(n as i64),
                    _ => return Err(err()),
                },
            },
            (ValueType::Integer, _) => return Err(err()),

            (ValueType::Number, v) => Value::Number(v.as_number().ok_or_else(err)?),

            (ValueType::Boolean, Value::Bool(_)) => self.clone(),
            (ValueType::Boolean, Value::Integer(i)) if *i == 0 || *i == 1 => Value::Bool(*i == 1),
            (ValueType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(err()),
            },
            (ValueType::Boolean, _) => return Err(err()),
        };
        Ok(out)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

#[cfg(feature = "persist")]
mod sql {
    use super::Value;
    use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for Value {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(match self {
                Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
                Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
                Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
                Value::Number(n) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*n)),
                Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            })
        }
    }

    impl FromSql for Value {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            Ok(match value {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::Integer(i),
                ValueRef::Real(n) => Value::Number(n),
                ValueRef::Text(_) => Value::Text(value.as_str()?.to_string()),
                ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
            })
        }
    }
}
