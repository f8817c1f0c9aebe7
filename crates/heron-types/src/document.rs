//! Document and array abstractions.
//!
//! Structured values are exposed through the `Document` and `Array` traits
//! so that table rows can stay lazily decoded while buffers built in memory
//! share the same surface. `FieldBuffer` and `ValueBuffer` are the growable
//! in-memory implementations.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// An ordered sequence of `(field, value)` pairs with stable insertion order.
pub trait Document: fmt::Debug + Send + Sync {
    /// Returns the value of the given top-level field.
    ///
    /// Returns [`Error::FieldNotFound`] if the field does not exist.
    fn get_by_field(&self, field: &str) -> Result<Value>;

    /// Calls `f` for each field in insertion order. If `f` returns an
    /// error, iteration stops and the error is returned.
    fn iterate(&self, f: &mut dyn FnMut(&str, &Value) -> Result<()>) -> Result<()>;
}

/// An ordered sequence of values.
pub trait Array: fmt::Debug + Send + Sync {
    /// Returns the value stored at the given position.
    ///
    /// Returns [`Error::ValueNotFound`] if the index is out of bounds.
    fn get_by_index(&self, index: usize) -> Result<Value>;

    /// Calls `f` for each `(index, value)` pair in order. If `f` returns
    /// an error, iteration stops and the error is returned.
    fn iterate(&self, f: &mut dyn FnMut(usize, &Value) -> Result<()>) -> Result<()>;
}

/// A growable in-memory document.
#[derive(Debug, Clone, Default)]
pub struct FieldBuffer {
    fields: Vec<(String, Value)>,
}

impl FieldBuffer {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, keeping insertion order. No uniqueness check is
    /// performed; use [`FieldBuffer::set_field`] to replace.
    pub fn add(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.fields.push((field.into(), value));
        self
    }

    /// Replaces the value of `field` if it exists, otherwise appends it.
    pub fn set_field(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Sets the value at `path`, replacing intermediate documents and
    /// arrays by copies. Intermediate documents are created when missing;
    /// a missing array slot is an error.
    pub fn set_path(&mut self, path: &crate::path::Path, value: Value) -> Result<()> {
        use crate::path::PathFragment;

        let (first, rest) = match path.0.split_first() {
            Some((PathFragment::Field(name), rest)) => (name.clone(), rest),
            _ => {
                return Err(Error::FieldNotFound {
                    field: path.to_string(),
                })
            }
        };

        if rest.is_empty() {
            self.set_field(first, value);
            return Ok(());
        }

        let mut current = match self.get_by_field(&first) {
            Ok(v) => v,
            Err(_) => FieldBuffer::new().into_value(),
        };
        set_in_value(&mut current, rest, value)?;
        self.set_field(first, current);
        Ok(())
    }

    /// Removes `field` if present. Returns true if a field was removed.
    pub fn remove_field(&mut self, field: &str) -> bool {
        match self.fields.iter().position(|(name, _)| name == field) {
            Some(i) => {
                self.fields.remove(i);
                true
            }
            None => false,
        }
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Clears all fields, keeping the allocation.
    pub fn reset(&mut self) {
        self.fields.clear();
    }

    /// Copies every field of `d` into this buffer.
    pub fn copy_document(&mut self, d: &dyn Document) -> Result<()> {
        d.iterate(&mut |field, value| {
            self.fields.push((field.to_string(), value.clone()));
            Ok(())
        })
    }

    /// Builds a buffer holding a copy of every field of `d`.
    pub fn from_document(d: &dyn Document) -> Result<Self> {
        let mut fb = FieldBuffer::new();
        fb.copy_document(d)?;
        Ok(fb)
    }

    /// Iterates over `(field, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Wraps the buffer into a document value.
    pub fn into_value(self) -> Value {
        Value::Document(Arc::new(self))
    }
}

impl Document for FieldBuffer {
    fn get_by_field(&self, field: &str) -> Result<Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::FieldNotFound {
                field: field.to_string(),
            })
    }

    fn iterate(&self, f: &mut dyn FnMut(&str, &Value) -> Result<()>) -> Result<()> {
        for (name, value) in &self.fields {
            f(name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for FieldBuffer {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        FieldBuffer {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A growable in-memory array.
#[derive(Debug, Clone, Default)]
pub struct ValueBuffer {
    values: Vec<Value>,
}

impl ValueBuffer {
    /// Creates an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value.
    pub fn push(&mut self, value: Value) -> &mut Self {
        self.values.push(value);
        self
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the array is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the values.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Wraps the buffer into an array value.
    pub fn into_value(self) -> Value {
        Value::Array(Arc::new(self))
    }
}

impl Array for ValueBuffer {
    fn get_by_index(&self, index: usize) -> Result<Value> {
        self.values
            .get(index)
            .cloned()
            .ok_or(Error::ValueNotFound { index })
    }

    fn iterate(&self, f: &mut dyn FnMut(usize, &Value) -> Result<()>) -> Result<()> {
        for (i, value) in self.values.iter().enumerate() {
            f(i, value)?;
        }
        Ok(())
    }
}

impl FromIterator<Value> for ValueBuffer {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        ValueBuffer {
            values: iter.into_iter().collect(),
        }
    }
}

fn set_in_value(
    current: &mut Value,
    fragments: &[crate::path::PathFragment],
    value: Value,
) -> Result<()> {
    use crate::path::PathFragment;

    let (fragment, rest) = match fragments.split_first() {
        Some(split) => split,
        None => {
            *current = value;
            return Ok(());
        }
    };

    match fragment {
        PathFragment::Field(name) => {
            let mut fb = match current {
                Value::Document(d) => FieldBuffer::from_document(d.as_ref())?,
                _ => FieldBuffer::new(),
            };
            let mut child = fb
                .get_by_field(name)
                .unwrap_or_else(|_| FieldBuffer::new().into_value());
            set_in_value(&mut child, rest, value)?;
            fb.set_field(name.clone(), child);
            *current = fb.into_value();
        }
        PathFragment::Index(i) => {
            let mut vb = match current {
                Value::Array(a) => ValueBuffer {
                    values: array_values(a.as_ref())?,
                },
                _ => return Err(Error::ValueNotFound { index: *i }),
            };
            let mut child = vb.get_by_index(*i)?;
            set_in_value(&mut child, rest, value)?;
            vb.values[*i] = child;
            *current = vb.into_value();
        }
    }
    Ok(())
}

/// Collects the fields of a document into a vector, in insertion order.
pub fn document_fields(d: &dyn Document) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    d.iterate(&mut |field, value| {
        out.push((field.to_string(), value.clone()));
        Ok(())
    })?;
    Ok(out)
}

/// Collects the values of an array into a vector, in order.
pub fn array_values(a: &dyn Array) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    a.iterate(&mut |_, value| {
        out.push(value.clone());
        Ok(())
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_buffer_insertion_order() {
        let mut fb = FieldBuffer::new();
        fb.add("b", Value::Integer(2));
        fb.add("a", Value::Integer(1));

        let fields = document_fields(&fb).unwrap();
        assert_eq!(fields[0].0, "b");
        assert_eq!(fields[1].0, "a");
    }

    #[test]
    fn test_field_buffer_get_missing() {
        let fb = FieldBuffer::new();
        assert!(matches!(
            fb.get_by_field("nope"),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_field_buffer_set_replaces() {
        let mut fb = FieldBuffer::new();
        fb.add("a", Value::Integer(1));
        fb.set_field("a", Value::Integer(2));
        assert_eq!(fb.len(), 1);
        assert_eq!(fb.get_by_field("a").unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_field_buffer_remove() {
        let mut fb = FieldBuffer::new();
        fb.add("a", Value::Integer(1));
        assert!(fb.remove_field("a"));
        assert!(!fb.remove_field("a"));
        assert!(fb.is_empty());
    }

    #[test]
    fn test_set_path_nested() {
        use crate::path::Path;

        let mut fb = FieldBuffer::new();
        fb.set_path(&Path::field("a").then_field("b"), Value::Integer(1))
            .unwrap();

        let a = fb.get_by_field("a").unwrap();
        match a {
            Value::Document(d) => {
                assert_eq!(d.get_by_field("b").unwrap(), Value::Integer(1));
            }
            other => panic!("expected document, got {other:?}"),
        }

        // setting into a missing array slot fails
        let err = fb.set_path(&Path::field("xs").then_index(0), Value::Null);
        assert!(err.is_err());
    }

    #[test]
    fn test_value_buffer_out_of_bounds() {
        let vb = ValueBuffer::new();
        assert!(matches!(
            vb.get_by_index(0),
            Err(Error::ValueNotFound { .. })
        ));
    }
}
