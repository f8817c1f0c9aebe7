//! Typed row storage on top of a store.
//!
//! A table borrows its store from a live transaction. Writes enforce the
//! table's field constraints (defaults, NOT NULL, declared types) and
//! keep every secondary index in sync.

use std::sync::Arc;

use heron_types::cast::cast_as;
use heron_types::document::{Document, FieldBuffer};
use heron_types::{codec, key, Value};

use crate::error::{Error, Result};
use crate::index::Index;
use crate::info::{IndexInfo, TableInfo};
use crate::varint::encode_uvarint;

/// A logical row set bound to a transaction.
pub struct Table<'t> {
    store: Box<dyn heron_kv::Store + 't>,
    info: Arc<TableInfo>,
    indexes: Vec<Index<'t>>,
}

impl<'t> Table<'t> {
    /// Binds a table to its store and secondary indexes.
    pub fn new(
        store: Box<dyn heron_kv::Store + 't>,
        info: Arc<TableInfo>,
        indexes: Vec<Index<'t>>,
    ) -> Self {
        Self {
            store,
            info,
            indexes,
        }
    }

    /// Returns the table metadata.
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.info.table_name
    }

    /// Returns the secondary indexes bound to this table.
    pub fn indexes(&self) -> &[Index<'t>] {
        &self.indexes
    }

    fn require_writable(&self) -> Result<()> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable {
                name: self.info.table_name.clone(),
            });
        }
        Ok(())
    }

    /// Inserts a document and returns its key.
    ///
    /// The key comes from the primary-key constraint when one is
    /// declared, otherwise from the store's monotonic sequence. Inserting
    /// an existing key returns [`Error::DuplicateDocument`].
    pub fn insert(&self, d: &dyn Document) -> Result<Vec<u8>> {
        self.require_writable()?;

        let fb = self.validate_document(d)?;
        let row_key = self.key_for(&fb)?;

        if self.store.get(&row_key)?.is_some() {
            return Err(Error::DuplicateDocument);
        }
        self.store.put(&row_key, &codec::encode_document(&fb)?)?;

        for idx in &self.indexes {
            if let Some(values) = index_values(idx.info(), &fb) {
                idx.set(&values, &row_key)?;
            }
        }

        Ok(row_key)
    }

    /// Replaces the document stored under `key`.
    pub fn replace(&self, row_key: &[u8], d: &dyn Document) -> Result<()> {
        self.require_writable()?;

        let old = self.get(row_key)?;
        for idx in &self.indexes {
            if let Some(values) = index_values(idx.info(), &old) {
                idx.delete(&values, row_key)?;
            }
        }

        let fb = self.validate_document(d)?;
        self.store.put(row_key, &codec::encode_document(&fb)?)?;

        for idx in &self.indexes {
            if let Some(values) = index_values(idx.info(), &fb) {
                idx.set(&values, row_key)?;
            }
        }
        Ok(())
    }

    /// Deletes the document stored under `key`.
    pub fn delete(&self, row_key: &[u8]) -> Result<()> {
        self.require_writable()?;

        let old = self.get(row_key)?;
        for idx in &self.indexes {
            if let Some(values) = index_values(idx.info(), &old) {
                idx.delete(&values, row_key)?;
            }
        }

        self.store.delete(row_key).map_err(|e| match e {
            heron_kv::Error::KeyNotFound => Error::KeyNotFound,
            other => Error::Engine(other),
        })
    }

    /// Returns the document stored under `key`.
    pub fn get(&self, row_key: &[u8]) -> Result<FieldBuffer> {
        match self.store.get(row_key)? {
            Some(bytes) => Ok(codec::decode_document(&bytes)?),
            None => Err(Error::KeyNotFound),
        }
    }

    /// Calls `f` for every row in ascending key order. Iteration stops at
    /// the first error and returns it.
    pub fn iterate(&self, f: impl FnMut(&[u8], &FieldBuffer) -> Result<()>) -> Result<()> {
        self.iterate_from(&[], f)
    }

    /// Like [`Table::iterate`], starting at the first key >= `seek`.
    pub fn iterate_from(
        &self,
        seek: &[u8],
        mut f: impl FnMut(&[u8], &FieldBuffer) -> Result<()>,
    ) -> Result<()> {
        let mut it = self.store.iterator(heron_kv::IteratorConfig::default());
        it.seek(seek);
        while it.valid() {
            let bytes = it.value()?;
            let fb = codec::decode_document(&bytes)?;
            f(it.key(), &fb)?;
            it.next();
        }
        Ok(())
    }

    /// Removes every row. Secondary index stores are not touched; callers
    /// rebuilding a table truncate its indexes too.
    pub fn truncate(&self) -> Result<()> {
        self.require_writable()?;
        self.store.truncate()?;
        Ok(())
    }

    /// Encodes a value for comparison against this table's primary keys,
    /// casting to the declared key type first.
    pub fn encode_primary_key(&self, v: &Value) -> Result<Vec<u8>> {
        let fc = self
            .info
            .primary_key()
            .ok_or_else(|| Error::InvalidArgument("table has no primary key".to_string()))?;
        let v = if fc.ty.is_any() {
            v.clone()
        } else {
            cast_as(v, fc.ty)?
        };
        Ok(key::encode_key(&v)?)
    }

    /// Applies defaults, NOT NULL checks and declared-type casts,
    /// returning the document that will actually be stored.
    fn validate_document(&self, d: &dyn Document) -> Result<FieldBuffer> {
        let mut fb = FieldBuffer::from_document(d)?;

        for fc in &self.info.field_constraints.0 {
            let current = match fc.path.get_value_from_document(&fb) {
                Ok(v) => Some(v),
                Err(e) => {
                    let e = Error::from(e);
                    if !e.is_field_not_found() {
                        return Err(e);
                    }
                    None
                }
            };

            let resolved = match (current, &fc.default_value) {
                (Some(v), _) => Some(v),
                (None, Some(default)) => {
                    fb.set_path(&fc.path, default.clone())?;
                    Some(default.clone())
                }
                (None, None) => None,
            };

            match resolved {
                None | Some(Value::Null) => {
                    if fc.is_not_null {
                        return Err(Error::NotNullViolation {
                            path: fc.path.to_string(),
                        });
                    }
                }
                Some(v) => {
                    if !fc.ty.is_any() && v.value_type() != fc.ty {
                        let casted = cast_as(&v, fc.ty)?;
                        fb.set_path(&fc.path, casted)?;
                    }
                }
            }
        }

        Ok(fb)
    }

    fn key_for(&self, fb: &FieldBuffer) -> Result<Vec<u8>> {
        match self.info.primary_key() {
            Some(fc) => {
                let v = fc
                    .path
                    .get_value_from_document(fb)
                    .map_err(|_| Error::NotNullViolation {
                        path: fc.path.to_string(),
                    })?;
                Ok(key::encode_key(&v)?)
            }
            None => Ok(encode_uvarint(self.store.next_sequence()?)),
        }
    }
}

/// Extracts the indexed values of a document, or None when any indexed
/// path is missing. Rows missing an indexed path are silently left out of
/// that index.
pub fn index_values(info: &IndexInfo, d: &dyn Document) -> Option<Vec<Value>> {
    let mut values = Vec::with_capacity(info.paths.len());
    for path in &info.paths {
        match path.get_value_from_document(d) {
            Ok(v) => values.push(v),
            Err(_) => return None,
        }
    }
    Some(values)
}
