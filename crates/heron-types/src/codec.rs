//! Binary storage codec for values and documents.
//!
//! This is the format rows are stored in: a type tag followed by a
//! type-specific payload, with length prefixes for variable-size data.
//! Unlike the key encoding it is self-describing and round-trips every
//! value, but its byte order carries no meaning.

use crate::document::{Document, FieldBuffer, ValueBuffer};
use crate::error::{Error, Result};
use crate::types::ValueType;
use crate::value::Value;

/// Appends the encoded form of `v` to `buf`.
pub fn append_value(buf: &mut Vec<u8>, v: &Value) -> Result<()> {
    buf.push(v.value_type().tag());
    match v {
        Value::Null => {}
        Value::Bool(b) => buf.push(u8::from(*b)),
        Value::Integer(i) => buf.extend_from_slice(&i.to_be_bytes()),
        Value::Double(f) => buf.extend_from_slice(&f.to_bits().to_be_bytes()),
        Value::Text(s) => append_bytes(buf, s.as_bytes()),
        Value::Blob(b) => append_bytes(buf, b),
        Value::Array(a) => {
            let mut count: u32 = 0;
            let mut body = Vec::new();
            a.iterate(&mut |_, item| {
                append_value(&mut body, item)?;
                count += 1;
                Ok(())
            })?;
            buf.extend_from_slice(&count.to_be_bytes());
            buf.extend_from_slice(&body);
        }
        Value::Document(d) => {
            let mut count: u32 = 0;
            let mut body = Vec::new();
            d.iterate(&mut |field, value| {
                append_bytes(&mut body, field.as_bytes());
                append_value(&mut body, value)?;
                count += 1;
                Ok(())
            })?;
            buf.extend_from_slice(&count.to_be_bytes());
            buf.extend_from_slice(&body);
        }
    }
    Ok(())
}

fn append_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Decodes one value from the front of `buf`, advancing it.
pub fn decode_value(buf: &mut &[u8]) -> Result<Value> {
    let tag = take(buf, 1)?[0];
    let ty = ValueType::from_tag(tag)
        .ok_or_else(|| Error::Corrupted(format!("unknown value tag {tag:#04x}")))?;

    Ok(match ty {
        ValueType::Null => Value::Null,
        ValueType::Bool => Value::Bool(take(buf, 1)?[0] != 0),
        ValueType::Integer => {
            Value::Integer(i64::from_be_bytes(take(buf, 8)?.try_into().unwrap()))
        }
        ValueType::Double => Value::Double(f64::from_bits(u64::from_be_bytes(
            take(buf, 8)?.try_into().unwrap(),
        ))),
        ValueType::Text => {
            let data = take_bytes(buf)?;
            Value::Text(
                String::from_utf8(data.to_vec())
                    .map_err(|e| Error::Corrupted(format!("invalid utf-8 text: {e}")))?,
            )
        }
        ValueType::Blob => Value::blob(take_bytes(buf)?),
        ValueType::Array => {
            let count = u32::from_be_bytes(take(buf, 4)?.try_into().unwrap());
            let mut vb = ValueBuffer::new();
            for _ in 0..count {
                vb.push(decode_value(buf)?);
            }
            vb.into_value()
        }
        ValueType::Document => {
            let count = u32::from_be_bytes(take(buf, 4)?.try_into().unwrap());
            let mut fb = FieldBuffer::new();
            for _ in 0..count {
                let field = String::from_utf8(take_bytes(buf)?.to_vec())
                    .map_err(|e| Error::Corrupted(format!("invalid utf-8 field name: {e}")))?;
                fb.add(field, decode_value(buf)?);
            }
            fb.into_value()
        }
        ValueType::Any => return Err(Error::Corrupted("untyped value tag".to_string())),
    })
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::Corrupted("truncated value encoding".to_string()));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = u32::from_be_bytes(take(buf, 4)?.try_into().unwrap()) as usize;
    take(buf, len)
}

/// Encodes a document for storage.
pub fn encode_document(d: &dyn Document) -> Result<Vec<u8>> {
    let mut count: u32 = 0;
    let mut body = Vec::new();
    d.iterate(&mut |field, value| {
        append_bytes(&mut body, field.as_bytes());
        append_value(&mut body, value)?;
        count += 1;
        Ok(())
    })?;

    let mut buf = Vec::with_capacity(body.len() + 5);
    buf.push(ValueType::Document.tag());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes a stored document.
pub fn decode_document(bytes: &[u8]) -> Result<FieldBuffer> {
    let mut buf = bytes;
    match decode_value(&mut buf)? {
        Value::Document(d) => FieldBuffer::from_document(d.as_ref()),
        other => Err(Error::Corrupted(format!(
            "expected document, found {}",
            other.value_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Integer(i64::MIN),
            Value::Double(-0.5),
            Value::text("héron"),
            Value::blob(vec![0, 255, 0]),
        ] {
            let mut buf = Vec::new();
            append_value(&mut buf, &v).unwrap();
            assert_eq!(decode_value(&mut &buf[..]).unwrap(), v);
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let mut inner = ValueBuffer::new();
        inner.push(Value::Integer(1));
        inner.push(Value::Null);

        let mut nested = FieldBuffer::new();
        nested.add("deep", Value::text("x"));

        let mut doc = FieldBuffer::new();
        doc.add("a", Value::Integer(42));
        doc.add("xs", inner.into_value());
        doc.add("sub", nested.into_value());

        let bytes = encode_document(&doc).unwrap();
        let decoded = decode_document(&bytes).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.get_by_field("a").unwrap(), Value::Integer(42));
        assert_eq!(
            decoded.get_by_field("sub").unwrap().value_type(),
            ValueType::Document
        );
        // insertion order survives the codec
        let order: Vec<String> = decoded.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(order, ["a", "xs", "sub"]);
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = Vec::new();
        append_value(&mut buf, &Value::text("hello")).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(decode_value(&mut &buf[..]).is_err());
    }
}
