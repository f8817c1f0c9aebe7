//! Casting rules between value types.
//!
//! Casts are null-preserving: NULL casts to NULL for every target type.
//! Every other failure surfaces as [`Error::Cast`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Error, Result};
use crate::json;
use crate::types::ValueType;
use crate::value::Value;

/// Casts `v` to the target type.
pub fn cast_as(v: &Value, target: ValueType) -> Result<Value> {
    if v.value_type() == target {
        return Ok(v.clone());
    }
    if v.is_null() {
        return Ok(Value::Null);
    }

    match target {
        ValueType::Bool => cast_as_bool(v),
        ValueType::Integer => cast_as_integer(v),
        ValueType::Double => cast_as_double(v),
        ValueType::Text => cast_as_text(v),
        ValueType::Blob => cast_as_blob(v),
        ValueType::Array => cast_as_array(v),
        ValueType::Document => cast_as_document(v),
        ValueType::Null | ValueType::Any => Err(Error::cast(
            v.value_type(),
            target,
            "not a castable target",
        )),
    }
}

/// Integer casts to true when non-zero; Text is parsed strictly as a
/// boolean. Everything else fails.
pub fn cast_as_bool(v: &Value) -> Result<Value> {
    match v {
        Value::Bool(_) => Ok(v.clone()),
        Value::Integer(i) => Ok(Value::Bool(*i != 0)),
        Value::Text(s) => match s.as_str() {
            "true" | "TRUE" | "1" => Ok(Value::Bool(true)),
            "false" | "FALSE" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::cast(
                ValueType::Text,
                ValueType::Bool,
                format!("{s:?} is not a boolean"),
            )),
        },
        _ => Err(Error::cast(v.value_type(), ValueType::Bool, "")),
    }
}

/// Bool casts to 0/1; Double truncates toward zero; Text tries an integer
/// parse, then a float parse followed by truncation.
pub fn cast_as_integer(v: &Value) -> Result<Value> {
    match v {
        Value::Integer(_) => Ok(v.clone()),
        Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        Value::Double(f) => Ok(Value::Integer(*f as i64)),
        Value::Text(s) => match s.parse::<i64>() {
            Ok(i) => Ok(Value::Integer(i)),
            Err(int_err) => match s.parse::<f64>() {
                Ok(f) => Ok(Value::Integer(f as i64)),
                Err(_) => Err(Error::cast(
                    ValueType::Text,
                    ValueType::Integer,
                    format!("{s:?}: {int_err}"),
                )),
            },
        },
        _ => Err(Error::cast(v.value_type(), ValueType::Integer, "")),
    }
}

/// Integer converts exactly; Text is parsed as a float.
pub fn cast_as_double(v: &Value) -> Result<Value> {
    match v {
        Value::Double(_) => Ok(v.clone()),
        Value::Integer(i) => Ok(Value::Double(*i as f64)),
        Value::Text(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| Error::cast(ValueType::Text, ValueType::Double, format!("{s:?}: {e}"))),
        _ => Err(Error::cast(v.value_type(), ValueType::Double, "")),
    }
}

/// Produces the canonical JSON representation. Text stays unquoted; a Blob
/// becomes its base64 form.
pub fn cast_as_text(v: &Value) -> Result<Value> {
    match v {
        Value::Text(_) => Ok(v.clone()),
        Value::Blob(b) => Ok(Value::Text(BASE64.encode(b))),
        _ => Ok(Value::Text(json::to_json_string(v)?)),
    }
}

/// Text decodes as base64. Everything else fails.
pub fn cast_as_blob(v: &Value) -> Result<Value> {
    match v {
        Value::Blob(_) => Ok(v.clone()),
        Value::Text(s) => BASE64
            .decode(s)
            .map(Value::Blob)
            .map_err(|e| Error::cast(ValueType::Text, ValueType::Blob, format!("{s:?}: {e}"))),
        _ => Err(Error::cast(v.value_type(), ValueType::Blob, "")),
    }
}

/// Text decodes as a JSON array. Everything else fails.
pub fn cast_as_array(v: &Value) -> Result<Value> {
    match v {
        Value::Array(_) => Ok(v.clone()),
        Value::Text(s) => json::parse_json_array(s)
            .map(Value::Array)
            .map_err(|e| Error::cast(ValueType::Text, ValueType::Array, e.to_string())),
        _ => Err(Error::cast(v.value_type(), ValueType::Array, "")),
    }
}

/// Text decodes as a JSON object. Everything else fails.
pub fn cast_as_document(v: &Value) -> Result<Value> {
    match v {
        Value::Document(_) => Ok(v.clone()),
        Value::Text(s) => json::parse_json_document(s)
            .map(|fb| fb.into_value())
            .map_err(|e| Error::cast(ValueType::Text, ValueType::Document, e.to_string())),
        _ => Err(Error::cast(v.value_type(), ValueType::Document, "")),
    }
}
