//! Ordered secondary indexes.
//!
//! An index maps `(encoded value tuple, row key)` to the row key, in its
//! own store. Entries sort by encoded tuple first, row key second, so a
//! prefix scan over one tuple visits matching rows in a deterministic
//! order. Heterogeneous types share one index: every column is encoded
//! with a leading type tag whose order matches cross-type value order,
//! and integers are normalized to doubles so both numeric types share one
//! encoding.

use std::sync::Arc;

use heron_types::{key, Value, ValueType};

use crate::error::{Error, Result};
use crate::info::IndexInfo;

/// A seek hint into an index: a value tuple, a bare type, or nothing.
///
/// An empty pivot (no values, a type) seeks to the first entry whose
/// type matches, which matters because heterogeneous types share one
/// index.
#[derive(Debug, Clone, Default)]
pub struct Pivot {
    /// Tuple prefix to seek to.
    pub values: Vec<Value>,
    /// Type to seek to when no values are given.
    pub ty: Option<ValueType>,
}

impl Pivot {
    /// A pivot seeking to the given tuple prefix.
    pub fn values(values: Vec<Value>) -> Self {
        Pivot { values, ty: None }
    }

    /// A pivot seeking to the first entry of the type of `v`.
    pub fn empty_for(v: &Value) -> Self {
        Pivot {
            values: Vec::new(),
            ty: Some(key::normalize_index_value(v).value_type()),
        }
    }
}

/// One decoded index entry, handed to scan callbacks.
#[derive(Debug)]
pub struct IndexEntry<'a> {
    /// The encoded value tuple.
    pub encoded: &'a [u8],
    /// The row key the entry points at.
    pub key: &'a [u8],
}

impl IndexEntry<'_> {
    /// Decodes the value tuple.
    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(key::decode_tuple(self.encoded)?)
    }
}

/// An ordered map from value tuples to row keys.
pub struct Index<'t> {
    store: Box<dyn heron_kv::Store + 't>,
    info: Arc<IndexInfo>,
}

impl<'t> Index<'t> {
    /// Wraps an index store.
    pub fn new(store: Box<dyn heron_kv::Store + 't>, info: Arc<IndexInfo>) -> Self {
        Self { store, info }
    }

    /// Returns the index metadata.
    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    /// Adds an entry mapping `values` to `row_key`.
    ///
    /// For unique indexes, an existing entry with the same tuple returns
    /// [`Error::DuplicateDocument`].
    pub fn set(&self, values: &[Value], row_key: &[u8]) -> Result<()> {
        if values.len() != self.info.arity() {
            return Err(Error::InvalidArgument(format!(
                "index {} expects {} values, got {}",
                self.info.index_name,
                self.info.arity(),
                values.len()
            )));
        }

        let tuple = key::encode_tuple(values)?;

        if self.info.unique {
            let mut it = self.store.iterator(heron_kv::IteratorConfig::default());
            it.seek(&tuple);
            if it.valid() && it.key().starts_with(&tuple) {
                return Err(Error::DuplicateDocument);
            }
        }

        let mut entry = tuple;
        entry.extend_from_slice(row_key);
        self.store.put(&entry, row_key)?;
        Ok(())
    }

    /// Removes the exact entry mapping `values` to `row_key`.
    pub fn delete(&self, values: &[Value], row_key: &[u8]) -> Result<()> {
        let mut entry = key::encode_tuple(values)?;
        entry.extend_from_slice(row_key);
        self.store.delete(&entry).map_err(|e| match e {
            heron_kv::Error::KeyNotFound => Error::KeyNotFound,
            other => Error::Engine(other),
        })
    }

    /// Scans entries in ascending order starting at `pivot`, calling `f`
    /// for each one. `f` may return [`Error::Stop`] to end the scan; the
    /// sentinel is swallowed, every other error propagates.
    pub fn ascend_greater_or_equal(
        &self,
        pivot: &Pivot,
        mut f: impl FnMut(&IndexEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        let seek = self.seek_key_ascending(pivot)?;
        self.scan(heron_kv::IteratorConfig { reverse: false }, &seek, &mut f)
    }

    /// Scans entries in descending order starting at `pivot`, calling
    /// `f` for each one.
    pub fn descend_less_or_equal(
        &self,
        pivot: &Pivot,
        mut f: impl FnMut(&IndexEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        let seek = self.seek_key_descending(pivot)?;
        self.scan(heron_kv::IteratorConfig { reverse: true }, &seek, &mut f)
    }

    /// Removes every entry.
    pub fn truncate(&self) -> Result<()> {
        self.store.truncate()?;
        Ok(())
    }

    fn scan(
        &self,
        config: heron_kv::IteratorConfig,
        seek: &[u8],
        f: &mut impl FnMut(&IndexEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        let mut it = self.store.iterator(config);
        it.seek(seek);
        while it.valid() {
            let row_key = it.value()?;
            let entry_key = it.key();
            if entry_key.len() < row_key.len() {
                return Err(Error::Corrupted("index entry shorter than row key".into()));
            }
            let entry = IndexEntry {
                encoded: &entry_key[..entry_key.len() - row_key.len()],
                key: &row_key,
            };
            match f(&entry) {
                Ok(()) => {}
                Err(e) if e.is_stop() => return Ok(()),
                Err(e) => return Err(e),
            }
            it.next();
        }
        Ok(())
    }

    fn seek_key_ascending(&self, pivot: &Pivot) -> Result<Vec<u8>> {
        if !pivot.values.is_empty() {
            return Ok(key::encode_tuple(&pivot.values)?);
        }
        match pivot.ty {
            Some(ty) => Ok(vec![ty.tag()]),
            None => Ok(Vec::new()),
        }
    }

    fn seek_key_descending(&self, pivot: &Pivot) -> Result<Vec<u8>> {
        if !pivot.values.is_empty() {
            // past the last entry sharing this tuple prefix: the prefix
            // ends with the 0x00 0x01 terminator, bump it to 0x02
            let mut seek = key::encode_tuple(&pivot.values)?;
            if let Some(last) = seek.last_mut() {
                *last = 0x02;
            }
            return Ok(seek);
        }
        match pivot.ty {
            Some(ty) => Ok(vec![ty.tag() + 1]),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use heron_kv::{Engine, MemoryEngine, Transaction as _};
    use heron_types::path::Path;

    use super::*;

    fn test_info(unique: bool) -> Arc<IndexInfo> {
        let mut info = IndexInfo::new("t", vec![Path::field("a")]).with_name("t_a_idx");
        info.types = vec![ValueType::Any];
        info.unique = unique;
        info.store_name = b"idx".to_vec();
        Arc::new(info)
    }

    fn collect(idx: &Index<'_>, pivot: &Pivot, reverse: bool) -> Vec<(Vec<Value>, Vec<u8>)> {
        let mut out = Vec::new();
        let f = |entry: &IndexEntry<'_>| {
            out.push((entry.values().unwrap(), entry.key.to_vec()));
            Ok(())
        };
        if reverse {
            idx.descend_less_or_equal(pivot, f).unwrap();
        } else {
            idx.ascend_greater_or_equal(pivot, f).unwrap();
        }
        out
    }

    #[test]
    fn test_set_and_scan_orders_by_value_then_key() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::Integer(2)], b"k2").unwrap();
            idx.set(&[Value::Integer(1)], b"k1").unwrap();
            idx.set(&[Value::Integer(1)], b"k0").unwrap();

            let entries = collect(&idx, &Pivot::default(), false);
            assert_eq!(
                entries,
                vec![
                    (vec![Value::Double(1.0)], b"k0".to_vec()),
                    (vec![Value::Double(1.0)], b"k1".to_vec()),
                    (vec![Value::Double(2.0)], b"k2".to_vec()),
                ]
            );
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_heterogeneous_types_sort_by_family() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::text("a")], b"k3").unwrap();
            idx.set(&[Value::Integer(10)], b"k2").unwrap();
            idx.set(&[Value::Bool(true)], b"k1").unwrap();
            idx.set(&[Value::Null], b"k0").unwrap();

            let entries = collect(&idx, &Pivot::default(), false);
            let keys: Vec<&[u8]> = entries.iter().map(|(_, k)| k.as_slice()).collect();
            assert_eq!(keys, vec![b"k0".as_ref(), b"k1", b"k2", b"k3"]);
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_empty_pivot_seeks_to_type() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::Bool(false)], b"b").unwrap();
            idx.set(&[Value::Integer(5)], b"i").unwrap();
            idx.set(&[Value::text("x")], b"t").unwrap();

            // ascending from the first numeric entry
            let entries = collect(&idx, &Pivot::empty_for(&Value::Integer(0)), false);
            let keys: Vec<&[u8]> = entries.iter().map(|(_, k)| k.as_slice()).collect();
            assert_eq!(keys, vec![b"i".as_ref(), b"t"]);

            // descending from the last numeric entry
            let entries = collect(&idx, &Pivot::empty_for(&Value::Integer(0)), true);
            let keys: Vec<&[u8]> = entries.iter().map(|(_, k)| k.as_slice()).collect();
            assert_eq!(keys, vec![b"i".as_ref(), b"b"]);
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_descend_includes_pivot_value() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::Integer(1)], b"k1").unwrap();
            idx.set(&[Value::Integer(2)], b"k2").unwrap();
            idx.set(&[Value::Integer(3)], b"k3").unwrap();

            let entries = collect(&idx, &Pivot::values(vec![Value::Integer(2)]), true);
            let keys: Vec<&[u8]> = entries.iter().map(|(_, k)| k.as_slice()).collect();
            assert_eq!(keys, vec![b"k2".as_ref(), b"k1"]);
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(true));
            idx.set(&[Value::Integer(1)], b"k1").unwrap();
            assert!(matches!(
                idx.set(&[Value::Integer(1)], b"k2"),
                Err(Error::DuplicateDocument)
            ));
            // 1 and 1.0 share an encoding, so they conflict too
            assert!(matches!(
                idx.set(&[Value::Double(1.0)], b"k3"),
                Err(Error::DuplicateDocument)
            ));
            idx.set(&[Value::Integer(2)], b"k4").unwrap();
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_delete_removes_exact_entry() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::Integer(1)], b"k1").unwrap();
            idx.set(&[Value::Integer(1)], b"k2").unwrap();

            idx.delete(&[Value::Integer(1)], b"k1").unwrap();
            let entries = collect(&idx, &Pivot::default(), false);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].1, b"k2".to_vec());

            assert!(matches!(
                idx.delete(&[Value::Integer(1)], b"k1"),
                Err(Error::KeyNotFound)
            ));
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_stop_sentinel_ends_scan_cleanly() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            for i in 0..5 {
                idx.set(&[Value::Integer(i)], format!("k{i}").as_bytes())
                    .unwrap();
            }

            let mut seen = 0;
            idx.ascend_greater_or_equal(&Pivot::default(), |_| {
                seen += 1;
                if seen == 2 {
                    return Err(Error::Stop);
                }
                Ok(())
            })
            .unwrap();
            assert_eq!(seen, 2);
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_truncate() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"idx").unwrap();
        {
            let idx = Index::new(tx.get_store(b"idx").unwrap(), test_info(false));
            idx.set(&[Value::Integer(1)], b"k1").unwrap();
            idx.truncate().unwrap();
            assert!(collect(&idx, &Pivot::default(), false).is_empty());
        }
        tx.commit().unwrap();
    }
}
