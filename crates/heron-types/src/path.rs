//! Structured field references.
//!
//! A `Path` points into a document, e.g. `a.b[2].c`. It holds no reference
//! to any document; it is a pure lookup key.

use std::fmt;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::value::Value;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathFragment {
    /// A named document field.
    Field(String),
    /// A positional array index.
    Index(usize),
}

/// A structured reference into a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(pub Vec<PathFragment>);

impl Path {
    /// Builds a single-fragment path referencing a top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        Path(vec![PathFragment::Field(name.into())])
    }

    /// Appends a field fragment.
    pub fn then_field(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathFragment::Field(name.into()));
        self
    }

    /// Appends an array-index fragment.
    pub fn then_index(mut self, index: usize) -> Self {
        self.0.push(PathFragment::Index(index));
        self
    }

    /// Parses a dotted path with optional `[n]` array indexes,
    /// e.g. `a.b[2].c`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut fragments = Vec::new();
        for part in s.split('.') {
            let mut rest = part;
            let field_end = rest.find('[').unwrap_or(rest.len());
            let field = &rest[..field_end];
            if !field.is_empty() {
                fragments.push(PathFragment::Field(field.to_string()));
            }
            rest = &rest[field_end..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| {
                    Error::Corrupted(format!("malformed path fragment: {part:?}"))
                })?;
                let index: usize = stripped[..close].parse().map_err(|_| {
                    Error::Corrupted(format!("malformed array index in path: {part:?}"))
                })?;
                fragments.push(PathFragment::Index(index));
                rest = &stripped[close + 1..];
            }
        }
        if fragments.is_empty() {
            return Err(Error::Corrupted("empty path".to_string()));
        }
        Ok(Path(fragments))
    }

    /// Returns the number of fragments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the path has no fragments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves the path against a document.
    ///
    /// Returns [`Error::FieldNotFound`] or [`Error::ValueNotFound`] if any
    /// fragment is missing.
    pub fn get_value_from_document(&self, d: &dyn Document) -> Result<Value> {
        let mut fragments = self.0.iter();
        let mut current = match fragments.next() {
            Some(PathFragment::Field(name)) => d.get_by_field(name)?,
            Some(PathFragment::Index(_)) | None => {
                return Err(Error::FieldNotFound {
                    field: self.to_string(),
                })
            }
        };

        for fragment in fragments {
            current = fragment.get_value_from_value(&current)?;
        }
        Ok(current)
    }

    /// Resolves the path against an arbitrary value.
    pub fn get_value(&self, v: &Value) -> Result<Value> {
        let mut current = v.clone();
        for fragment in &self.0 {
            current = fragment.get_value_from_value(&current)?;
        }
        Ok(current)
    }
}

impl PathFragment {
    fn get_value_from_value(&self, v: &Value) -> Result<Value> {
        match (self, v) {
            (PathFragment::Field(name), Value::Document(d)) => d.get_by_field(name),
            (PathFragment::Index(i), Value::Array(a)) => a.get_by_index(*i),
            (PathFragment::Field(name), _) => Err(Error::FieldNotFound {
                field: name.clone(),
            }),
            (PathFragment::Index(i), _) => Err(Error::ValueNotFound { index: *i }),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fragment) in self.0.iter().enumerate() {
            match fragment {
                PathFragment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathFragment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldBuffer, ValueBuffer};

    #[test]
    fn test_parse_and_display() {
        let p = Path::parse("a.b[2].c").unwrap();
        assert_eq!(p.0.len(), 4);
        assert_eq!(p.to_string(), "a.b[2].c");

        assert!(Path::parse("").is_err());
        assert!(Path::parse("a[x]").is_err());
    }

    #[test]
    fn test_get_nested_value() {
        let mut inner = ValueBuffer::new();
        inner.push(Value::Integer(10));
        inner.push(Value::Integer(20));

        let mut doc = FieldBuffer::new();
        doc.add("xs", inner.into_value());

        let p = Path::field("xs").then_index(1);
        assert_eq!(
            p.get_value_from_document(&doc).unwrap(),
            Value::Integer(20)
        );

        let missing = Path::field("xs").then_index(5);
        assert!(missing.get_value_from_document(&doc).is_err());
    }

    #[test]
    fn test_missing_top_level_field() {
        let doc = FieldBuffer::new();
        let p = Path::field("a");
        assert!(matches!(
            p.get_value_from_document(&doc),
            Err(Error::FieldNotFound { .. })
        ));
    }
}
