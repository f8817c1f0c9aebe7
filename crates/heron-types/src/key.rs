//! Order-preserving binary key encoding.
//!
//! For two values `a` and `b` of the same type in {Bool, Integer, Double,
//! Text, Blob}, `encode_key(a) < encode_key(b)` in byte order iff `a < b`.
//!
//! Composite index tuples concatenate per-column encodings, each one
//! escaped (0x00 becomes 0x00 0xFF) and closed with the terminator
//! 0x00 0x01, so that the byte order of the concatenation equals tuple
//! order and a shorter tuple sorts before its extensions.

use crate::codec;
use crate::error::{Error, Result};
use crate::types::ValueType;
use crate::value::Value;

/// Column terminator inside composite tuples.
const TERMINATOR: [u8; 2] = [0x00, 0x01];
/// Escape sequence replacing a 0x00 byte inside a column.
const ESCAPE: [u8; 2] = [0x00, 0xFF];

/// Appends the 1-byte encoding of a boolean.
pub fn append_bool(buf: &mut Vec<u8>, b: bool) {
    buf.push(u8::from(b));
}

/// Appends the order-preserving encoding of an i64: the sign bit is
/// flipped and the result written big-endian, which shifts negatives
/// below positives while preserving order.
pub fn append_i64(buf: &mut Vec<u8>, i: i64) {
    buf.extend_from_slice(&((i as u64) ^ (1 << 63)).to_be_bytes());
}

/// Appends the order-preserving encoding of an f64: the IEEE-754 bits,
/// big-endian, with the sign bit flipped when positive and all bits
/// flipped when negative.
pub fn append_f64(buf: &mut Vec<u8>, f: f64) {
    let bits = f.to_bits();
    let mapped = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    buf.extend_from_slice(&mapped.to_be_bytes());
}

/// Decodes the boolean encoding.
pub fn decode_bool(buf: &[u8]) -> Result<bool> {
    match buf {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(Error::Corrupted("invalid bool key".to_string())),
    }
}

/// Decodes the i64 encoding.
pub fn decode_i64(buf: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = buf
        .try_into()
        .map_err(|_| Error::Corrupted("invalid integer key".to_string()))?;
    Ok((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}

/// Decodes the f64 encoding.
pub fn decode_f64(buf: &[u8]) -> Result<f64> {
    let bytes: [u8; 8] = buf
        .try_into()
        .map_err(|_| Error::Corrupted("invalid double key".to_string()))?;
    let mapped = u64::from_be_bytes(bytes);
    let bits = if mapped >> 63 == 1 { mapped & !(1 << 63) } else { !mapped };
    Ok(f64::from_bits(bits))
}

/// Encodes a value as a leaf key, without type information.
///
/// Null encodes as the empty key. Arrays and documents use the recursive
/// storage codec; their byte order is not value order.
pub fn encode_key(v: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    append_key(&mut buf, v)?;
    Ok(buf)
}

fn append_key(buf: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Null => {}
        Value::Bool(b) => append_bool(buf, *b),
        Value::Integer(i) => append_i64(buf, *i),
        Value::Double(f) => append_f64(buf, *f),
        Value::Text(s) => buf.extend_from_slice(s.as_bytes()),
        Value::Blob(b) => buf.extend_from_slice(b),
        Value::Array(_) | Value::Document(_) => codec::append_value(buf, v)?,
    }
    Ok(())
}

/// Decodes a leaf key of a known type.
pub fn decode_key(buf: &[u8], ty: ValueType) -> Result<Value> {
    if buf.is_empty() && ty != ValueType::Text && ty != ValueType::Blob {
        return Ok(Value::Null);
    }
    match ty {
        ValueType::Null => Ok(Value::Null),
        ValueType::Bool => Ok(Value::Bool(decode_bool(buf)?)),
        ValueType::Integer => Ok(Value::Integer(decode_i64(buf)?)),
        ValueType::Double => Ok(Value::Double(decode_f64(buf)?)),
        ValueType::Text => Ok(Value::Text(
            String::from_utf8(buf.to_vec())
                .map_err(|e| Error::Corrupted(format!("invalid text key: {e}")))?,
        )),
        ValueType::Blob => Ok(Value::blob(buf)),
        ValueType::Array | ValueType::Document => codec::decode_value(&mut &buf[..]),
        ValueType::Any => Err(Error::Corrupted("untyped leaf key".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Composite tuples
// ---------------------------------------------------------------------------

/// Normalizes a value for storage in an index column: integers become
/// doubles so that the two numeric types share one ordered encoding.
pub fn normalize_index_value(v: &Value) -> Value {
    match v {
        Value::Integer(i) => Value::Double(*i as f64),
        other => other.clone(),
    }
}

/// Encodes one index column: a type tag byte followed by the leaf
/// encoding. Tag order matches cross-type value order, so heterogeneous
/// values in one column still sort correctly.
pub fn encode_index_value(v: &Value) -> Result<Vec<u8>> {
    let v = normalize_index_value(v);
    let mut buf = vec![v.value_type().tag()];
    append_key(&mut buf, &v)?;
    Ok(buf)
}

/// Decodes one index column produced by [`encode_index_value`].
pub fn decode_index_value(buf: &[u8]) -> Result<Value> {
    let (tag, rest) = buf
        .split_first()
        .ok_or_else(|| Error::Corrupted("empty index column".to_string()))?;
    let ty = ValueType::from_tag(*tag)
        .ok_or_else(|| Error::Corrupted(format!("unknown index column tag {tag:#04x}")))?;
    decode_key(rest, ty)
}

/// Appends `raw` to `buf` with 0x00 escaped, then the column terminator.
pub fn append_escaped_column(buf: &mut Vec<u8>, raw: &[u8]) {
    for &b in raw {
        if b == 0x00 {
            buf.extend_from_slice(&ESCAPE);
        } else {
            buf.push(b);
        }
    }
    buf.extend_from_slice(&TERMINATOR);
}

/// Encodes a tuple of values as a composite, order-preserving key.
pub fn encode_tuple(values: &[Value]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for v in values {
        let column = encode_index_value(v)?;
        append_escaped_column(&mut buf, &column);
    }
    Ok(buf)
}

/// Splits an encoded tuple back into its unescaped columns.
pub fn split_tuple(mut buf: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut columns = Vec::new();
    let mut current = Vec::new();
    while !buf.is_empty() {
        match buf {
            [0x00, 0x01, rest @ ..] => {
                columns.push(std::mem::take(&mut current));
                buf = rest;
            }
            [0x00, 0xFF, rest @ ..] => {
                current.push(0x00);
                buf = rest;
            }
            [0x00, ..] => {
                return Err(Error::Corrupted("dangling escape in tuple".to_string()));
            }
            [b, rest @ ..] => {
                current.push(*b);
                buf = rest;
            }
            [] => unreachable!("loop condition guarantees buf is non-empty"),
        }
    }
    if !current.is_empty() {
        return Err(Error::Corrupted("unterminated tuple column".to_string()));
    }
    Ok(columns)
}

/// Decodes an encoded tuple into values.
pub fn decode_tuple(buf: &[u8]) -> Result<Vec<Value>> {
    split_tuple(buf)?
        .iter()
        .map(|column| decode_index_value(column))
        .collect()
}
