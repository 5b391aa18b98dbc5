//! Conversions between Rhai values and field values

use rhai::{Array, Dynamic, Map};
use std::collections::BTreeMap;
use thiserror::Error;
use trellis_core::value::Value;

/// A script value with no field representation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("values of type '{0}' cannot be stored in fields")]
    Unsupported(String),

    #[error("'{key}': {source}")]
    InEntry {
        key: String,
        #[source]
        source: Box<ConvertError>,
    },
}

/// Convert a script value into a field value.
///
/// `()` becomes `nil`; arrays convert element-wise. Maps and custom types
/// are rejected.
pub fn to_value(value: &Dynamic) -> Result<Value, ConvertError> {
    if value.is_unit() {
        return Ok(Value::Nil);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Value::Double(f));
    }
    if value.is_string() {
        return value
            .clone()
            .into_string()
            .map(Value::String)
            .map_err(|t| ConvertError::Unsupported(t.to_string()));
    }
    if value.is_array() {
        let items = value
            .clone()
            .into_array()
            .map_err(|t| ConvertError::Unsupported(t.to_string()))?;
        return items
            .iter()
            .map(to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }
    Err(ConvertError::Unsupported(value.type_name().to_string()))
}

/// Convert a field value into a script value
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Nil => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Double(f) => Dynamic::from(*f),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from(items.iter().map(to_dynamic).collect::<Array>()),
    }
}

/// Convert an object-map of script values, keeping key order
pub fn map_to_values(map: &Map) -> Result<BTreeMap<String, Value>, ConvertError> {
    map.iter()
        .map(|(key, value)| {
            to_value(value)
                .map(|v| (key.to_string(), v))
                .map_err(|e| ConvertError::InEntry {
                    key: key.to_string(),
                    source: Box::new(e),
                })
        })
        .collect()
}
