//! JSON conversion for values and documents.
//!
//! Blobs serialize as base64 strings. Numbers that do not fit an i64 parse
//! back as Double, so every scalar round-trips through JSON.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::document::{Document, FieldBuffer, ValueBuffer};
use crate::error::{Error, Result};
use crate::value::Value;

/// Converts a value to its JSON representation.
pub fn to_json(v: &Value) -> Result<serde_json::Value> {
    Ok(match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Double(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            // non-finite floats have no JSON form
            None => serde_json::Value::Null,
        },
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(BASE64.encode(b)),
        Value::Array(a) => {
            let mut out = Vec::new();
            a.iterate(&mut |_, item| {
                out.push(to_json(item)?);
                Ok(())
            })?;
            serde_json::Value::Array(out)
        }
        Value::Document(d) => serde_json::Value::Object(document_to_json_map(d.as_ref())?),
    })
}

fn document_to_json_map(d: &dyn Document) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut map = serde_json::Map::new();
    d.iterate(&mut |field, value| {
        map.insert(field.to_string(), to_json(value)?);
        Ok(())
    })?;
    Ok(map)
}

/// Converts a JSON value into a runtime value. Numbers become Integer when
/// they fit an i64, Double otherwise.
pub fn from_json(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Double(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let mut vb = ValueBuffer::new();
            for item in items {
                vb.push(from_json(item));
            }
            vb.into_value()
        }
        serde_json::Value::Object(map) => {
            let mut fb = FieldBuffer::new();
            for (field, value) in map {
                fb.add(field.clone(), from_json(value));
            }
            fb.into_value()
        }
    }
}

/// Serializes a value to a JSON string.
pub fn to_json_string(v: &Value) -> Result<String> {
    Ok(serde_json::to_string(&to_json(v)?)?)
}

/// Parses a JSON string into a value.
pub fn parse_json(s: &str) -> Result<Value> {
    let v: serde_json::Value = serde_json::from_str(s)?;
    Ok(from_json(&v))
}

/// Parses a JSON object into a document buffer.
pub fn parse_json_document(s: &str) -> Result<FieldBuffer> {
    match parse_json(s)? {
        Value::Document(d) => FieldBuffer::from_document(d.as_ref()),
        other => Err(Error::Corrupted(format!(
            "expected JSON object, got {}",
            other.value_type()
        ))),
    }
}

/// Parses a JSON array into an array value.
pub fn parse_json_array(s: &str) -> Result<Arc<dyn crate::document::Array>> {
    match parse_json(s)? {
        Value::Array(a) => Ok(a),
        other => Err(Error::Corrupted(format!(
            "expected JSON array, got {}",
            other.value_type()
        ))),
    }
}

/// Serializes a document to a JSON string.
pub fn document_to_json_string(d: &dyn Document) -> Result<String> {
    Ok(serde_json::to_string(&serde_json::Value::Object(
        document_to_json_map(d)?,
    ))?)
}
