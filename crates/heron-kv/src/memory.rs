//! In-memory reference engine.
//!
//! Stores live in a `BTreeMap` guarded by a readers-writer lock. Writable
//! transactions are serialized by a mutex and keep a copy of the engine
//! state taken at begin; rollback restores that copy. Reads go straight to
//! the shared state, which gives read-your-writes within a transaction.

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{Error, Result};
use crate::{Engine, Iterator, IteratorConfig, Store, Transaction};

/// An in-memory ordered engine, suitable for tests and embedding.
#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<EngineState>,
    writer: Mutex<()>,
}

#[derive(Default, Clone)]
struct EngineState {
    stores: BTreeMap<Vec<u8>, StoreState>,
}

#[derive(Default, Clone)]
struct StoreState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    sequence: u64,
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn Transaction + '_>> {
        let guard = if writable {
            Some(self.writer.lock())
        } else {
            None
        };
        let undo = writable.then(|| self.state.read().clone());

        Ok(Box::new(MemoryTransaction {
            engine: self,
            _guard: guard,
            undo,
            writable,
            closed: false,
        }))
    }
}

/// A transaction over [`MemoryEngine`].
pub struct MemoryTransaction<'a> {
    engine: &'a MemoryEngine,
    _guard: Option<MutexGuard<'a, ()>>,
    undo: Option<EngineState>,
    writable: bool,
    closed: bool,
}

impl MemoryTransaction<'_> {
    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::TransactionClosed);
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        self.require_open()?;
        if !self.writable {
            return Err(Error::TransactionReadOnly);
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn writable(&self) -> bool {
        self.writable
    }

    fn commit(&mut self) -> Result<()> {
        self.require_open()?;
        self.closed = true;
        self.undo = None;
        self._guard = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.require_open()?;
        if let Some(undo) = self.undo.take() {
            *self.engine.state.write() = undo;
        }
        self.closed = true;
        self._guard = None;
        Ok(())
    }

    fn get_store(&self, name: &[u8]) -> Result<Box<dyn Store + '_>> {
        self.require_open()?;
        let state = self.engine.state.read();
        if !state.stores.contains_key(name) {
            return Err(Error::StoreNotFound);
        }
        Ok(Box::new(MemoryStore {
            tx: self,
            name: name.to_vec(),
        }))
    }

    fn create_store(&self, name: &[u8]) -> Result<()> {
        self.require_writable()?;
        let mut state = self.engine.state.write();
        if state.stores.contains_key(name) {
            return Err(Error::StoreAlreadyExists);
        }
        state.stores.insert(name.to_vec(), StoreState::default());
        Ok(())
    }

    fn drop_store(&self, name: &[u8]) -> Result<()> {
        self.require_writable()?;
        let mut state = self.engine.state.write();
        state
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or(Error::StoreNotFound)
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        // an open writable transaction rolls back when dropped
        if !self.closed {
            if let Some(undo) = self.undo.take() {
                *self.engine.state.write() = undo;
            }
        }
    }
}

struct MemoryStore<'a> {
    tx: &'a MemoryTransaction<'a>,
    name: Vec<u8>,
}

impl MemoryStore<'_> {
    fn with_store<T>(&self, f: impl FnOnce(&StoreState) -> Result<T>) -> Result<T> {
        let state = self.tx.engine.state.read();
        let store = state.stores.get(&self.name).ok_or(Error::StoreNotFound)?;
        f(store)
    }

    fn with_store_mut<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        self.tx.require_writable()?;
        let mut state = self.tx.engine.state.write();
        let store = state
            .stores
            .get_mut(&self.name)
            .ok_or(Error::StoreNotFound)?;
        f(store)
    }
}

impl Store for MemoryStore<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_store(|s| Ok(s.entries.get(key).cloned()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_store_mut(|s| {
            s.entries.insert(key.to_vec(), value.to_vec());
            Ok(())
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.with_store_mut(|s| s.entries.remove(key).map(|_| ()).ok_or(Error::KeyNotFound))
    }

    fn truncate(&self) -> Result<()> {
        self.with_store_mut(|s| {
            s.entries.clear();
            Ok(())
        })
    }

    fn next_sequence(&self) -> Result<u64> {
        self.with_store_mut(|s| {
            s.sequence += 1;
            Ok(s.sequence)
        })
    }

    fn iterator(&self, config: IteratorConfig) -> Box<dyn crate::Iterator + '_> {
        // snapshot of the store at creation time; statements that mutate
        // while scanning reopen an iterator per batch
        let entries = self
            .with_store(|s| {
                Ok(s.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>())
            })
            .unwrap_or_default();

        let mut it = MemoryIterator {
            entries,
            reverse: config.reverse,
            pos: 0,
            exhausted: true,
        };
        it.seek(&[]);
        Box::new(it)
    }
}

struct MemoryIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    reverse: bool,
    pos: usize,
    exhausted: bool,
}

impl crate::Iterator for MemoryIterator {
    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            let upper = if key.is_empty() {
                self.entries.len()
            } else {
                self.entries.partition_point(|(k, _)| k.as_slice() <= key)
            };
            if upper == 0 {
                self.exhausted = true;
            } else {
                self.pos = upper - 1;
                self.exhausted = false;
            }
        } else {
            let lower = self.entries.partition_point(|(k, _)| k.as_slice() < key);
            if lower >= self.entries.len() {
                self.exhausted = true;
            } else {
                self.pos = lower;
                self.exhausted = false;
            }
        }
    }

    fn valid(&self) -> bool {
        !self.exhausted
    }

    fn next(&mut self) {
        if self.exhausted {
            return;
        }
        if self.reverse {
            if self.pos == 0 {
                self.exhausted = true;
            } else {
                self.pos -= 1;
            }
        } else {
            self.pos += 1;
            if self.pos >= self.entries.len() {
                self.exhausted = true;
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> Result<Vec<u8>> {
        Ok(self.entries[self.pos].1.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_keys(store: &dyn Store, config: IteratorConfig) -> Vec<Vec<u8>> {
        let mut it = store.iterator(config);
        let mut keys = Vec::new();
        it.seek(&[]);
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        keys
    }

    #[test]
    fn test_store_crud() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"t").unwrap();

        {
            let store = tx.get_store(b"t").unwrap();
            store.put(b"a", b"1").unwrap();
            assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(store.get(b"b").unwrap(), None);

            store.delete(b"a").unwrap();
            assert_eq!(store.delete(b"a"), Err(Error::KeyNotFound));
        }

        tx.commit().unwrap();
    }

    #[test]
    fn test_missing_store() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(false).unwrap();
        assert!(matches!(tx.get_store(b"nope"), Err(Error::StoreNotFound)));
    }

    #[test]
    fn test_read_only_transaction_rejects_writes() {
        let engine = MemoryEngine::new();
        {
            let mut tx = engine.begin(true).unwrap();
            tx.create_store(b"t").unwrap();
            tx.commit().unwrap();
        }

        let tx = engine.begin(false).unwrap();
        assert_eq!(tx.create_store(b"u"), Err(Error::TransactionReadOnly));
        let store = tx.get_store(b"t").unwrap();
        assert_eq!(store.put(b"a", b"1"), Err(Error::TransactionReadOnly));
    }

    #[test]
    fn test_rollback_restores_state() {
        let engine = MemoryEngine::new();
        {
            let mut tx = engine.begin(true).unwrap();
            tx.create_store(b"t").unwrap();
            tx.get_store(b"t").unwrap().put(b"a", b"1").unwrap();
            tx.commit().unwrap();
        }

        {
            let mut tx = engine.begin(true).unwrap();
            {
                let store = tx.get_store(b"t").unwrap();
                store.put(b"a", b"2").unwrap();
                store.put(b"b", b"3").unwrap();
            }
            tx.create_store(b"u").unwrap();
            tx.rollback().unwrap();
        }

        let tx = engine.begin(false).unwrap();
        let store = tx.get_store(b"t").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        assert!(matches!(tx.get_store(b"u"), Err(Error::StoreNotFound)));
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let engine = MemoryEngine::new();
        {
            let tx = engine.begin(true).unwrap();
            tx.create_store(b"t").unwrap();
            // dropped without commit
        }
        let tx = engine.begin(false).unwrap();
        assert!(matches!(tx.get_store(b"t"), Err(Error::StoreNotFound)));
    }

    #[test]
    fn test_read_your_writes() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"t").unwrap();
        {
            let store = tx.get_store(b"t").unwrap();
            store.put(b"k", b"v").unwrap();
            assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_iterator_order_and_seek() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"t").unwrap();
        {
            let store = tx.get_store(b"t").unwrap();
            for k in [b"b".as_ref(), b"a", b"d", b"c"] {
                store.put(k, b"x").unwrap();
            }

            assert_eq!(
                collect_keys(store.as_ref(), IteratorConfig::default()),
                vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
            );
            assert_eq!(
                collect_keys(store.as_ref(), IteratorConfig { reverse: true }),
                vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
            );

            let mut it = store.iterator(IteratorConfig::default());
            it.seek(b"bb");
            assert!(it.valid());
            assert_eq!(it.key(), b"c");

            let mut it = store.iterator(IteratorConfig { reverse: true });
            it.seek(b"bb");
            assert!(it.valid());
            assert_eq!(it.key(), b"b");

            let mut it = store.iterator(IteratorConfig { reverse: true });
            it.seek(b"0");
            assert!(!it.valid());
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_next_sequence_is_monotonic_and_persisted() {
        let engine = MemoryEngine::new();
        {
            let mut tx = engine.begin(true).unwrap();
            tx.create_store(b"t").unwrap();
            let store = tx.get_store(b"t").unwrap();
            assert_eq!(store.next_sequence().unwrap(), 1);
            assert_eq!(store.next_sequence().unwrap(), 2);
            drop(store);
            tx.commit().unwrap();
        }
        {
            let mut tx = engine.begin(true).unwrap();
            let store = tx.get_store(b"t").unwrap();
            assert_eq!(store.next_sequence().unwrap(), 3);
            drop(store);
            tx.commit().unwrap();
        }
    }

    #[test]
    fn test_truncate_keeps_sequence() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        tx.create_store(b"t").unwrap();
        {
            let store = tx.get_store(b"t").unwrap();
            store.put(b"a", b"1").unwrap();
            store.next_sequence().unwrap();
            store.truncate().unwrap();
            assert_eq!(store.get(b"a").unwrap(), None);
            assert_eq!(store.next_sequence().unwrap(), 2);
        }
        tx.commit().unwrap();
    }
}
