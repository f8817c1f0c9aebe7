//! The catalog and its cache.
//!
//! The catalog tracks every table, index and sequence. All objects live
//! in one in-memory cache guarded by a readers-writer lock, mirrored into
//! the persisted `__genji_catalog` table within the same transaction.
//! Each cache mutation pushes a compensating rollback hook; the persisted
//! side is undone by the engine's own transaction rollback, so a failed
//! transaction leaves both views exactly as they were.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use heron_types::ValueType;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::info::{FieldConstraint, IndexInfo, SequenceInfo, TableInfo};
use crate::sequence::Sequence;
use crate::system;
use crate::table::{index_values, Table};
use crate::transaction::Transaction;

/// Registry of all database objects.
pub struct Catalog {
    cache: Arc<CatalogCache>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            cache: Arc::new(CatalogCache::default()),
        }
    }

    /// Loads persisted entries into the cache and registers the two
    /// system tables: the catalog table itself (read-only) and the
    /// mutable sequence table.
    pub fn load(
        &self,
        tables: Vec<TableInfo>,
        indexes: Vec<IndexInfo>,
        sequences: Vec<SequenceInfo>,
    ) {
        let mut inner = self.cache.inner.write();

        let mut catalog_info = system::catalog_table_info();
        catalog_info.read_only = true;
        inner
            .tables
            .insert(catalog_info.table_name.clone(), Arc::new(catalog_info));

        let sequence_info = system::sequence_table_info();
        inner
            .tables
            .insert(sequence_info.table_name.clone(), Arc::new(sequence_info));

        for info in tables {
            inner.tables.insert(info.table_name.clone(), Arc::new(info));
        }
        for info in indexes {
            let info = Arc::new(info);
            inner
                .indexes_per_table
                .entry(info.table_name.clone())
                .or_default()
                .push(info.clone());
            inner.indexes.insert(info.index_name.clone(), info);
        }
        for info in sequences {
            inner.sequences.insert(info.name.clone(), Arc::new(info));
        }
    }

    /// Returns the metadata of a table.
    pub fn table_info(&self, name: &str) -> Result<Arc<TableInfo>> {
        self.cache.table(name)
    }

    /// Returns the metadata of an index.
    pub fn index_info(&self, name: &str) -> Result<Arc<IndexInfo>> {
        self.cache.index(name)
    }

    /// Binds a table and its indexes to a transaction.
    pub fn get_table<'t>(&self, tx: &'t Transaction<'_>, name: &str) -> Result<Table<'t>> {
        let info = self.cache.table(name)?;
        let store = tx.get_store(&info.store_name)?;

        let idx_infos = self.cache.table_indexes(name);
        let mut indexes = Vec::with_capacity(idx_infos.len());
        for idx_info in idx_infos {
            indexes.push(Index::new(tx.get_store(&idx_info.store_name)?, idx_info));
        }

        Ok(Table::new(store, info, indexes))
    }

    /// Binds an index to a transaction.
    pub fn get_index<'t>(&self, tx: &'t Transaction<'_>, name: &str) -> Result<Index<'t>> {
        let info = self.cache.index(name)?;
        Ok(Index::new(tx.get_store(&info.store_name)?, info))
    }

    /// Returns a sequence handle.
    pub fn get_sequence(&self, name: &str) -> Result<Sequence> {
        let info = self.cache.sequence(name)?;
        Ok(Sequence::new((*info).clone()))
    }

    /// Creates a table. Fails with [`Error::AlreadyExists`] when any
    /// object carries that name.
    pub fn create_table(&self, tx: &Transaction<'_>, name: &str, info: TableInfo) -> Result<()> {
        let mut info = info;
        info.table_name = name.to_string();
        info.field_constraints = info.field_constraints.infer()?;

        system::insert_table(tx, &mut info)?;
        tx.kv().create_store(&info.store_name)?;
        self.cache.add_table(tx, Arc::new(info))?;

        debug!(table = name, "created table");
        Ok(())
    }

    /// Drops a table, cascading to every index on it.
    pub fn drop_table(&self, tx: &Transaction<'_>, name: &str) -> Result<()> {
        let (info, removed_indexes) = self.cache.delete_table(tx, name)?;

        for idx in &removed_indexes {
            system::delete_entry(tx, &idx.index_name)?;
            tx.kv().drop_store(&idx.store_name)?;
        }

        system::delete_entry(tx, name)?;
        tx.kv().drop_store(&info.store_name)?;

        debug!(table = name, "dropped table");
        Ok(())
    }

    /// Creates an index and builds it over the table's existing rows.
    ///
    /// A missing name is generated as `{table}_{paths}_idx`, suffixed
    /// with a counter on collision. `types` is filled from the table's
    /// field constraints, `Any` for unconstrained paths.
    pub fn create_index(&self, tx: &Transaction<'_>, info: IndexInfo) -> Result<()> {
        let mut info = info;
        if info.store_name.is_empty() {
            info.store_name = system::allocate_store_name(tx)?;
        }

        let info = self.cache.add_index(tx, info)?;
        system::insert_index(tx, &mut info.as_ref().clone())?;
        tx.kv().create_store(&info.store_name)?;

        let idx = self.get_index(tx, &info.index_name)?;
        let table = self.get_table(tx, &info.table_name)?;
        build_index(&idx, &table)?;

        debug!(index = %info.index_name, table = %info.table_name, "created index");
        Ok(())
    }

    /// Drops an index. Indexes backing a table constraint cannot be
    /// dropped.
    pub fn drop_index(&self, tx: &Transaction<'_>, name: &str) -> Result<()> {
        let info = self.cache.delete_index(tx, name)?;
        system::delete_entry(tx, name)?;
        tx.kv().drop_store(&info.store_name)?;

        debug!(index = name, "dropped index");
        Ok(())
    }

    /// Lists index names, lexicographically sorted. With a table name,
    /// only that table's indexes are returned.
    pub fn list_indexes(&self, table: Option<&str>) -> Vec<String> {
        let mut names = self.cache.list_indexes(table);
        names.sort();
        names
    }

    /// Renames a table, rewriting the table name on every dependent
    /// index.
    pub fn rename_table(&self, tx: &Transaction<'_>, old: &str, new: &str) -> Result<()> {
        let new = new.to_string();
        let (new_info, new_indexes) = self.cache.update_table(tx, old, |info| {
            info.table_name = new.clone();
            Ok(())
        })?;

        system::insert_table(tx, &mut new_info.as_ref().clone())?;
        for idx in &new_indexes {
            system::replace_index(tx, &idx.index_name, idx)?;
        }
        system::delete_entry(tx, old)?;

        debug!(from = old, to = %new_info.table_name, "renamed table");
        Ok(())
    }

    /// Adds a field constraint to an existing table.
    pub fn add_field_constraint(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        fc: FieldConstraint,
    ) -> Result<()> {
        let (new_info, _) = self
            .cache
            .update_table(tx, table, |info| info.field_constraints.add(fc.clone()))?;
        system::replace_table(tx, table, &new_info)
    }

    /// Truncates and rebuilds one index.
    pub fn reindex(&self, tx: &Transaction<'_>, index_name: &str) -> Result<()> {
        let idx = self.get_index(tx, index_name)?;
        let table = self.get_table(tx, &idx.info().table_name)?;

        idx.truncate()?;
        build_index(&idx, &table)
    }

    /// Truncates and rebuilds every index.
    pub fn reindex_all(&self, tx: &Transaction<'_>) -> Result<()> {
        for name in self.list_indexes(None) {
            self.reindex(tx, &name)?;
        }
        Ok(())
    }

    /// Creates a sequence.
    pub fn create_sequence(
        &self,
        tx: &Transaction<'_>,
        info: SequenceInfo,
    ) -> Result<()> {
        system::insert_sequence(tx, &info)?;
        Sequence::new(info.clone()).init(tx)?;
        self.cache.add_sequence(tx, Arc::new(info))
    }

    /// Drops a sequence.
    pub fn drop_sequence(&self, tx: &Transaction<'_>, name: &str) -> Result<()> {
        let info = self.cache.delete_sequence(tx, name)?;
        system::delete_entry(tx, name)?;
        Sequence::new((*info).clone()).drop_counter(tx)
    }

    /// Returns a comparable snapshot of the cache. Used to check that a
    /// rolled-back transaction left no trace.
    pub fn snapshot(&self) -> CatalogSnapshot {
        let inner = self.cache.inner.read();

        let mut tables: Vec<TableInfo> =
            inner.tables.values().map(|t| (**t).clone()).collect();
        tables.sort_by(|a, b| a.table_name.cmp(&b.table_name));

        let mut indexes: Vec<IndexInfo> =
            inner.indexes.values().map(|i| (**i).clone()).collect();
        indexes.sort_by(|a, b| a.index_name.cmp(&b.index_name));

        let mut sequences: Vec<String> = inner.sequences.keys().cloned().collect();
        sequences.sort();

        CatalogSnapshot {
            tables,
            indexes,
            sequences,
        }
    }

    /// Asserts that the cache and the persisted catalog table agree on
    /// which objects exist. The name checks are enforced both in the
    /// cache and by the catalog table's primary key; any divergence
    /// between the two is a corruption.
    pub fn verify_consistency(&self, tx: &Transaction<'_>) -> Result<()> {
        let (tables, indexes, sequences) = system::load_catalog(tx)?;

        let mut persisted: Vec<String> = tables
            .iter()
            .map(|t| t.table_name.clone())
            .chain(indexes.iter().map(|i| i.index_name.clone()))
            .chain(sequences.iter().map(|s| s.name.clone()))
            .collect();
        persisted.sort();

        let inner = self.cache.inner.read();
        let mut cached: Vec<String> = inner
            .tables
            .keys()
            .filter(|name| !name.starts_with(system::INTERNAL_PREFIX))
            .cloned()
            .chain(inner.indexes.keys().cloned())
            .chain(inner.sequences.keys().cloned())
            .collect();
        cached.sort();

        if persisted != cached {
            return Err(Error::Corrupted(format!(
                "catalog cache and persisted catalog diverge: cache {cached:?}, table {persisted:?}"
            )));
        }
        Ok(())
    }
}

/// Indexes every row of `table` into `idx`, skipping rows that miss an
/// indexed path.
fn build_index(idx: &Index<'_>, table: &Table<'_>) -> Result<()> {
    table.iterate(|row_key, doc| {
        match index_values(idx.info(), doc) {
            Some(values) => idx.set(&values, row_key),
            None => Ok(()),
        }
    })
}

/// A comparable view of the catalog contents.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    tables: Vec<TableInfo>,
    indexes: Vec<IndexInfo>,
    sequences: Vec<String>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheInner {
    tables: HashMap<String, Arc<TableInfo>>,
    indexes: HashMap<String, Arc<IndexInfo>>,
    indexes_per_table: HashMap<String, Vec<Arc<IndexInfo>>>,
    sequences: HashMap<String, Arc<SequenceInfo>>,
}

impl CacheInner {
    fn name_taken(&self, name: &str) -> bool {
        self.tables.contains_key(name)
            || self.indexes.contains_key(name)
            || self.sequences.contains_key(name)
    }
}

#[derive(Default)]
struct CatalogCache {
    inner: RwLock<CacheInner>,
}

impl CatalogCache {
    fn table(&self, name: &str) -> Result<Arc<TableInfo>> {
        self.inner
            .read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound {
                name: name.to_string(),
            })
    }

    fn index(&self, name: &str) -> Result<Arc<IndexInfo>> {
        self.inner
            .read()
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound {
                name: name.to_string(),
            })
    }

    fn sequence(&self, name: &str) -> Result<Arc<SequenceInfo>> {
        self.inner
            .read()
            .sequences
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SequenceNotFound {
                name: name.to_string(),
            })
    }

    fn table_indexes(&self, table: &str) -> Vec<Arc<IndexInfo>> {
        self.inner
            .read()
            .indexes_per_table
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn list_indexes(&self, table: Option<&str>) -> Vec<String> {
        let inner = self.inner.read();
        match table {
            None => inner.indexes.keys().cloned().collect(),
            Some(t) => inner
                .indexes_per_table
                .get(t)
                .map(|idxs| idxs.iter().map(|i| i.index_name.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

impl CatalogCache {
    fn add_table(self: &Arc<Self>, tx: &Transaction<'_>, info: Arc<TableInfo>) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.name_taken(&info.table_name) {
            return Err(Error::AlreadyExists {
                name: info.table_name.clone(),
            });
        }
        inner.tables.insert(info.table_name.clone(), info.clone());

        let cache = Arc::clone(self);
        tx.on_rollback(Box::new(move || {
            cache.inner.write().tables.remove(&info.table_name);
        }));
        Ok(())
    }

    fn delete_table(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        name: &str,
    ) -> Result<(Arc<TableInfo>, Vec<Arc<IndexInfo>>)> {
        let mut inner = self.inner.write();

        let info = inner
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound {
                name: name.to_string(),
            })?;
        if info.read_only {
            return Err(Error::ReadOnlyTable {
                name: name.to_string(),
            });
        }

        inner.tables.remove(name);
        let removed_indexes = inner.indexes_per_table.remove(name).unwrap_or_default();
        for idx in &removed_indexes {
            inner.indexes.remove(&idx.index_name);
        }

        let cache = Arc::clone(self);
        let restored_table = info.clone();
        let restored_indexes = removed_indexes.clone();
        let table_name = name.to_string();
        tx.on_rollback(Box::new(move || {
            let mut inner = cache.inner.write();
            inner
                .tables
                .insert(table_name.clone(), restored_table.clone());
            for idx in &restored_indexes {
                inner.indexes.insert(idx.index_name.clone(), idx.clone());
            }
            if !restored_indexes.is_empty() {
                inner
                    .indexes_per_table
                    .insert(table_name.clone(), restored_indexes.clone());
            }
        }));

        Ok((info, removed_indexes))
    }

    fn add_index(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        mut info: IndexInfo,
    ) -> Result<Arc<IndexInfo>> {
        let mut inner = self.inner.write();

        if info.index_name.is_empty() {
            info.index_name = generate_index_name(&inner, &info);
        }
        if inner.name_taken(&info.index_name) {
            return Err(Error::AlreadyExists {
                name: info.index_name.clone(),
            });
        }

        let table = inner
            .tables
            .get(&info.table_name)
            .ok_or_else(|| Error::TableNotFound {
                name: info.table_name.clone(),
            })?;

        // a typed constraint on an indexed path makes that column typed
        info.types = info
            .paths
            .iter()
            .map(|path| {
                table
                    .field_constraints
                    .get(path)
                    .map(|fc| fc.ty)
                    .unwrap_or(ValueType::Any)
            })
            .collect();

        let info = Arc::new(info);
        inner
            .indexes
            .insert(info.index_name.clone(), info.clone());
        let previous = inner
            .indexes_per_table
            .get(&info.table_name)
            .cloned()
            .unwrap_or_default();
        inner
            .indexes_per_table
            .entry(info.table_name.clone())
            .or_default()
            .push(info.clone());

        let cache = Arc::clone(self);
        let hook_info = info.clone();
        tx.on_rollback(Box::new(move || {
            let mut inner = cache.inner.write();
            inner.indexes.remove(&hook_info.index_name);
            if previous.is_empty() {
                inner.indexes_per_table.remove(&hook_info.table_name);
            } else {
                inner
                    .indexes_per_table
                    .insert(hook_info.table_name.clone(), previous.clone());
            }
        }));

        Ok(info)
    }

    fn delete_index(self: &Arc<Self>, tx: &Transaction<'_>, name: &str) -> Result<Arc<IndexInfo>> {
        let mut inner = self.inner.write();

        let info = inner
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound {
                name: name.to_string(),
            })?;

        if let Some(path) = &info.constraint_path {
            return Err(Error::InvalidArgument(format!(
                "cannot drop index {} because constraint on {}({}) requires it",
                info.index_name, info.table_name, path
            )));
        }

        inner.indexes.remove(name);
        let old_list = inner
            .indexes_per_table
            .get(&info.table_name)
            .cloned()
            .unwrap_or_default();
        let new_list: Vec<Arc<IndexInfo>> = old_list
            .iter()
            .filter(|idx| idx.index_name != name)
            .cloned()
            .collect();
        inner
            .indexes_per_table
            .insert(info.table_name.clone(), new_list);

        let cache = Arc::clone(self);
        let hook_info = info.clone();
        tx.on_rollback(Box::new(move || {
            let mut inner = cache.inner.write();
            inner
                .indexes
                .insert(hook_info.index_name.clone(), hook_info.clone());
            inner
                .indexes_per_table
                .insert(hook_info.table_name.clone(), old_list.clone());
        }));

        Ok(info)
    }

    fn update_table(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        name: &str,
        f: impl FnOnce(&mut TableInfo) -> Result<()>,
    ) -> Result<(Arc<TableInfo>, Vec<Arc<IndexInfo>>)> {
        let mut inner = self.inner.write();

        let old_info = inner
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound {
                name: name.to_string(),
            })?;
        if old_info.read_only {
            return Err(Error::ReadOnlyTable {
                name: name.to_string(),
            });
        }

        let mut clone = (*old_info).clone();
        f(&mut clone)?;

        let renamed = clone.table_name != name;
        if renamed && inner.name_taken(&clone.table_name) {
            return Err(Error::AlreadyExists {
                name: clone.table_name,
            });
        }

        let mut old_indexes = Vec::new();
        let mut new_indexes = Vec::new();
        if renamed {
            inner.tables.remove(name);

            for idx in inner.indexes_per_table.remove(name).unwrap_or_default() {
                let mut idx_clone = (*idx).clone();
                idx_clone.table_name = clone.table_name.clone();
                let idx_clone = Arc::new(idx_clone);
                inner
                    .indexes
                    .insert(idx_clone.index_name.clone(), idx_clone.clone());
                new_indexes.push(idx_clone);
                old_indexes.push(idx);
            }
            if !new_indexes.is_empty() {
                inner
                    .indexes_per_table
                    .insert(clone.table_name.clone(), new_indexes.clone());
            }
        }

        let new_info = Arc::new(clone);
        inner
            .tables
            .insert(new_info.table_name.clone(), new_info.clone());

        let cache = Arc::clone(self);
        let hook_new = new_info.clone();
        let hook_old = old_info;
        let hook_old_indexes = old_indexes;
        let old_name = name.to_string();
        tx.on_rollback(Box::new(move || {
            let mut inner = cache.inner.write();
            inner.tables.remove(&hook_new.table_name);
            inner.tables.insert(old_name.clone(), hook_old.clone());

            for idx in &hook_old_indexes {
                inner.indexes.insert(idx.index_name.clone(), idx.clone());
            }
            if hook_new.table_name != old_name {
                inner.indexes_per_table.remove(&hook_new.table_name);
                if !hook_old_indexes.is_empty() {
                    inner
                        .indexes_per_table
                        .insert(old_name.clone(), hook_old_indexes.clone());
                }
            }
        }));

        Ok((new_info, new_indexes))
    }

    fn add_sequence(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        info: Arc<SequenceInfo>,
    ) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.name_taken(&info.name) {
            return Err(Error::AlreadyExists {
                name: info.name.clone(),
            });
        }
        inner.sequences.insert(info.name.clone(), info.clone());

        let cache = Arc::clone(self);
        tx.on_rollback(Box::new(move || {
            cache.inner.write().sequences.remove(&info.name);
        }));
        Ok(())
    }

    fn delete_sequence(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        name: &str,
    ) -> Result<Arc<SequenceInfo>> {
        let mut inner = self.inner.write();

        let info = inner
            .sequences
            .remove(name)
            .ok_or_else(|| Error::SequenceNotFound {
                name: name.to_string(),
            })?;

        let cache = Arc::clone(self);
        let hook_info = info.clone();
        tx.on_rollback(Box::new(move || {
            cache
                .inner
                .write()
                .sequences
                .insert(hook_info.name.clone(), hook_info.clone());
        }));

        Ok(info)
    }
}

fn generate_index_name(inner: &CacheInner, info: &IndexInfo) -> String {
    let paths = info
        .paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("_");

    let base = format!("{}_{}_idx", info.table_name, paths);
    if !inner.indexes.contains_key(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}{n}");
        if !inner.indexes.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
