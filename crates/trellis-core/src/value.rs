//! Field values and their type tags

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value stored in a field binding or passed to a builder
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
}

/// Primitive type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    String,
    Int,
    Double,
    /// No primitive type could be inferred; the field accepts any value
    Unknown,
}

impl FieldType {
    /// Infer the type tag of a value.
    ///
    /// Precedence is boolean, textual, integral, floating; everything else
    /// is [`FieldType::Unknown`].
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::String(_) => Self::String,
            Value::Int(_) => Self::Int,
            Value::Double(_) => Self::Double,
            Value::Nil | Value::List(_) => Self::Unknown,
        }
    }

    /// Host-facing type name
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::String => "string",
            Self::Int => "int",
            Self::Double => "double",
            Self::Unknown => "unknown",
        }
    }

    /// Convert `value` so it can be stored in a field of this type.
    ///
    /// Integers widen into `double` fields. Returns `None` on mismatch.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (Self::Unknown, v) => Some(v),
            (Self::Double, Value::Int(i)) => Some(Value::Double(i as f64)),
            (ty, v) if FieldType::of(&v) == ty => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        FieldType::of(self)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floating value, widening integers
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Parse command-line text as a value of the given field type.
    ///
    /// Text for `unknown` fields is parsed as JSON when possible and kept as a
    /// string otherwise.
    pub fn parse_as(text: &str, field_type: FieldType) -> Option<Self> {
        match field_type {
            FieldType::Bool => text.parse().ok().map(Value::Bool),
            FieldType::String => Some(Value::String(text.to_string())),
            FieldType::Int => text.parse().ok().map(Value::Int),
            FieldType::Double => text.parse().ok().map(Value::Double),
            FieldType::Unknown => Some(
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}
