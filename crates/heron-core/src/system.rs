//! Persistence of catalog entries in the reserved system tables.
//!
//! Every table, index and sequence is described by one document of the
//! `__genji_catalog` table, keyed by name. The `sql` column carries the
//! human-readable definition; the structured fields next to it are what
//! the catalog actually reloads at open time.

use std::sync::Arc;

use heron_types::document::{array_values, Document, FieldBuffer, ValueBuffer};
use heron_types::path::Path;
use heron_types::{key, Value, ValueType};

use crate::error::{Error, Result};
use crate::info::{FieldConstraint, FieldConstraints, IndexInfo, SequenceInfo, TableInfo};
use crate::table::Table;
use crate::transaction::Transaction;
use crate::varint::encode_uvarint;

/// Prefix of every reserved table name.
pub const INTERNAL_PREFIX: &str = "__genji_";

/// Name of the read-only catalog table.
pub const CATALOG_TABLE_NAME: &str = "__genji_catalog";

/// Name of the mutable sequence-counter table.
pub const SEQUENCE_TABLE_NAME: &str = "__genji_sequence";

/// `type` column value for tables.
pub const TYPE_TABLE: &str = "table";
/// `type` column value for indexes.
pub const TYPE_INDEX: &str = "index";
/// `type` column value for sequences.
pub const TYPE_SEQUENCE: &str = "sequence";

/// Schema of the catalog table.
pub fn catalog_table_info() -> TableInfo {
    let mut info = TableInfo::new(CATALOG_TABLE_NAME);
    info.store_name = CATALOG_TABLE_NAME.as_bytes().to_vec();
    info.field_constraints = {
        let mut fcs = FieldConstraints::default();
        for fc in [
            FieldConstraint::new(Path::field("name"))
                .with_type(ValueType::Text)
                .primary_key(),
            FieldConstraint::new(Path::field("type")).with_type(ValueType::Text),
            FieldConstraint::new(Path::field("table_name")).with_type(ValueType::Text),
            FieldConstraint::new(Path::field("sql")).with_type(ValueType::Text),
            FieldConstraint::new(Path::field("store_name")).with_type(ValueType::Blob),
        ] {
            fcs.add(fc).expect("static catalog schema");
        }
        fcs
    };
    info
}

/// Schema of the sequence-counter table.
pub fn sequence_table_info() -> TableInfo {
    let mut info = TableInfo::new(SEQUENCE_TABLE_NAME);
    info.store_name = SEQUENCE_TABLE_NAME.as_bytes().to_vec();
    info.field_constraints = {
        let mut fcs = FieldConstraints::default();
        fcs.add(
            FieldConstraint::new(Path::field("name"))
                .with_type(ValueType::Text)
                .primary_key(),
        )
        .expect("static sequence schema");
        fcs.add(FieldConstraint::new(Path::field("seq")).with_type(ValueType::Integer))
            .expect("static sequence schema");
        fcs
    };
    info
}

/// Creates the system stores when they do not exist yet.
pub fn init(tx: &Transaction<'_>) -> Result<()> {
    for name in [CATALOG_TABLE_NAME, SEQUENCE_TABLE_NAME] {
        match tx.kv().get_store(name.as_bytes()) {
            Ok(_) => {}
            Err(heron_kv::Error::StoreNotFound) => tx.kv().create_store(name.as_bytes())?,
            Err(e) => return Err(Error::Engine(e)),
        }
    }
    Ok(())
}

/// Opens the catalog table for writing by the catalog itself.
pub fn catalog_table<'t>(tx: &'t Transaction<'_>) -> Result<Table<'t>> {
    let store = tx.get_store(CATALOG_TABLE_NAME.as_bytes())?;
    Ok(Table::new(store, Arc::new(catalog_table_info()), vec![]))
}

/// Opens the sequence table.
pub fn sequence_table<'t>(tx: &'t Transaction<'_>) -> Result<Table<'t>> {
    let store = tx.get_store(SEQUENCE_TABLE_NAME.as_bytes())?;
    Ok(Table::new(store, Arc::new(sequence_table_info()), vec![]))
}

/// Allocates a store name from the catalog store's sequence.
pub fn allocate_store_name(tx: &Transaction<'_>) -> Result<Vec<u8>> {
    let store = tx.get_store(CATALOG_TABLE_NAME.as_bytes())?;
    Ok(encode_uvarint(store.next_sequence()?))
}

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

fn table_info_to_document(info: &TableInfo) -> FieldBuffer {
    let mut doc = FieldBuffer::new();
    doc.add("name", Value::text(info.table_name.clone()));
    doc.add("type", Value::text(TYPE_TABLE));
    doc.add("store_name", Value::blob(info.store_name.clone()));
    doc.add("sql", Value::text(info.to_sql()));

    let mut constraints = ValueBuffer::new();
    for fc in &info.field_constraints.0 {
        let mut c = FieldBuffer::new();
        c.add("path", Value::text(fc.path.to_string()));
        c.add("type", Value::Integer(i64::from(fc.ty.tag())));
        c.add("primary_key", Value::Bool(fc.is_primary_key));
        c.add("not_null", Value::Bool(fc.is_not_null));
        if let Some(d) = &fc.default_value {
            c.add("default", d.clone());
        }
        constraints.push(c.into_value());
    }
    doc.add("constraints", constraints.into_value());
    doc
}

fn index_info_to_document(info: &IndexInfo) -> FieldBuffer {
    let mut doc = FieldBuffer::new();
    doc.add("name", Value::text(info.index_name.clone()));
    doc.add("type", Value::text(TYPE_INDEX));
    doc.add("store_name", Value::blob(info.store_name.clone()));
    doc.add("table_name", Value::text(info.table_name.clone()));
    doc.add("sql", Value::text(info.to_sql()));

    let mut paths = ValueBuffer::new();
    for p in &info.paths {
        paths.push(Value::text(p.to_string()));
    }
    doc.add("paths", paths.into_value());

    let mut types = ValueBuffer::new();
    for t in &info.types {
        types.push(Value::Integer(i64::from(t.tag())));
    }
    doc.add("types", types.into_value());

    doc.add("unique", Value::Bool(info.unique));
    if let Some(p) = &info.constraint_path {
        doc.add("constraint_path", Value::text(p.to_string()));
    }
    doc
}

fn sequence_info_to_document(info: &SequenceInfo) -> FieldBuffer {
    let mut doc = FieldBuffer::new();
    doc.add("name", Value::text(info.name.clone()));
    doc.add("type", Value::text(TYPE_SEQUENCE));
    doc.add("sql", Value::text(info.to_sql()));
    doc
}

fn text_field(doc: &dyn Document, field: &str) -> Result<String> {
    match doc.get_by_field(field)? {
        Value::Text(s) => Ok(s),
        other => Err(Error::Corrupted(format!(
            "catalog field {field} should be text, found {}",
            other.value_type()
        ))),
    }
}

fn blob_field(doc: &dyn Document, field: &str) -> Result<Vec<u8>> {
    match doc.get_by_field(field)? {
        Value::Blob(b) => Ok(b),
        other => Err(Error::Corrupted(format!(
            "catalog field {field} should be a blob, found {}",
            other.value_type()
        ))),
    }
}

fn type_tag_value(v: &Value) -> Result<ValueType> {
    match v {
        Value::Integer(i) => ValueType::from_tag(*i as u8)
            .ok_or_else(|| Error::Corrupted(format!("unknown type tag {i}"))),
        other => Err(Error::Corrupted(format!(
            "type tag should be an integer, found {}",
            other.value_type()
        ))),
    }
}

fn document_to_table_info(doc: &dyn Document) -> Result<TableInfo> {
    let mut info = TableInfo::new(text_field(doc, "name")?);
    info.store_name = blob_field(doc, "store_name")?;

    if let Ok(Value::Array(constraints)) = doc.get_by_field("constraints") {
        for c in array_values(constraints.as_ref())? {
            let c = match c {
                Value::Document(d) => d,
                other => {
                    return Err(Error::Corrupted(format!(
                        "constraint entry should be a document, found {}",
                        other.value_type()
                    )))
                }
            };
            let mut fc = FieldConstraint::new(Path::parse(&text_field(c.as_ref(), "path")?)?);
            fc.ty = type_tag_value(&c.get_by_field("type")?)?;
            fc.is_primary_key = matches!(c.get_by_field("primary_key")?, Value::Bool(true));
            fc.is_not_null = matches!(c.get_by_field("not_null")?, Value::Bool(true));
            fc.default_value = c.get_by_field("default").ok();
            info.field_constraints.0.push(fc);
        }
    }
    Ok(info)
}

fn document_to_index_info(doc: &dyn Document) -> Result<IndexInfo> {
    let mut info = IndexInfo::new(text_field(doc, "table_name")?, Vec::new())
        .with_name(text_field(doc, "name")?);
    info.store_name = blob_field(doc, "store_name")?;
    info.unique = matches!(doc.get_by_field("unique")?, Value::Bool(true));

    if let Value::Array(paths) = doc.get_by_field("paths")? {
        for p in array_values(paths.as_ref())? {
            match p {
                Value::Text(s) => info.paths.push(Path::parse(&s)?),
                other => {
                    return Err(Error::Corrupted(format!(
                        "index path should be text, found {}",
                        other.value_type()
                    )))
                }
            }
        }
    }
    if let Value::Array(types) = doc.get_by_field("types")? {
        for t in array_values(types.as_ref())? {
            info.types.push(type_tag_value(&t)?);
        }
    }
    if let Ok(Value::Text(p)) = doc.get_by_field("constraint_path") {
        info.constraint_path = Some(Path::parse(&p)?);
    }
    Ok(info)
}

/// Persists a table entry. The store name is allocated when empty.
pub fn insert_table(tx: &Transaction<'_>, info: &mut TableInfo) -> Result<()> {
    if info.store_name.is_empty() {
        info.store_name = allocate_store_name(tx)?;
    }
    let table = catalog_table(tx)?;
    table
        .insert(&table_info_to_document(info))
        .map(|_| ())
        .map_err(|e| match e {
            Error::DuplicateDocument => Error::AlreadyExists {
                name: info.table_name.clone(),
            },
            other => other,
        })
}

/// Rewrites the entry of `name` with new table metadata.
pub fn replace_table(tx: &Transaction<'_>, name: &str, info: &TableInfo) -> Result<()> {
    let table = catalog_table(tx)?;
    let row_key = key::encode_key(&Value::text(name))?;
    table.replace(&row_key, &table_info_to_document(info))
}

/// Deletes the entry of table `name`.
pub fn delete_entry(tx: &Transaction<'_>, name: &str) -> Result<()> {
    let table = catalog_table(tx)?;
    let row_key = key::encode_key(&Value::text(name))?;
    table.delete(&row_key)
}

/// Persists an index entry. The store name is allocated when empty.
pub fn insert_index(tx: &Transaction<'_>, info: &mut IndexInfo) -> Result<()> {
    if info.store_name.is_empty() {
        info.store_name = allocate_store_name(tx)?;
    }
    let table = catalog_table(tx)?;
    table
        .insert(&index_info_to_document(info))
        .map(|_| ())
        .map_err(|e| match e {
            Error::DuplicateDocument => Error::AlreadyExists {
                name: info.index_name.clone(),
            },
            other => other,
        })
}

/// Rewrites the entry of index `name`.
pub fn replace_index(tx: &Transaction<'_>, name: &str, info: &IndexInfo) -> Result<()> {
    let table = catalog_table(tx)?;
    let row_key = key::encode_key(&Value::text(name))?;
    table.replace(&row_key, &index_info_to_document(info))
}

/// Persists a sequence entry.
pub fn insert_sequence(tx: &Transaction<'_>, info: &SequenceInfo) -> Result<()> {
    let table = catalog_table(tx)?;
    table
        .insert(&sequence_info_to_document(info))
        .map(|_| ())
        .map_err(|e| match e {
            Error::DuplicateDocument => Error::AlreadyExists {
                name: info.name.clone(),
            },
            other => other,
        })
}

/// Reads every persisted catalog entry.
pub fn load_catalog(
    tx: &Transaction<'_>,
) -> Result<(Vec<TableInfo>, Vec<IndexInfo>, Vec<SequenceInfo>)> {
    let table = catalog_table(tx)?;
    let mut tables = Vec::new();
    let mut indexes = Vec::new();
    let mut sequences = Vec::new();

    table.iterate(|_, doc| {
        match text_field(doc, "type")?.as_str() {
            TYPE_TABLE => tables.push(document_to_table_info(doc)?),
            TYPE_INDEX => indexes.push(document_to_index_info(doc)?),
            TYPE_SEQUENCE => sequences.push(SequenceInfo::new(text_field(doc, "name")?)),
            other => {
                return Err(Error::Corrupted(format!(
                    "unknown catalog entry type {other:?}"
                )))
            }
        }
        Ok(())
    })?;

    Ok((tables, indexes, sequences))
}

#[cfg(test)]
mod tests {
    use heron_kv::Engine as _;
    use heron_kv::MemoryEngine;

    use super::*;

    #[test]
    fn test_table_entry_roundtrip() {
        let engine = MemoryEngine::new();
        let tx = Transaction::new(engine.begin(true).unwrap());
        init(&tx).unwrap();

        let mut info = TableInfo::new("users");
        info.field_constraints
            .add(
                FieldConstraint::new(Path::field("id"))
                    .with_type(ValueType::Integer)
                    .primary_key(),
            )
            .unwrap();
        info.field_constraints
            .add(
                FieldConstraint::new(Path::field("age"))
                    .with_type(ValueType::Integer)
                    .with_default(Value::Integer(18)),
            )
            .unwrap();

        insert_table(&tx, &mut info).unwrap();
        assert!(!info.store_name.is_empty());

        let (tables, indexes, sequences) = load_catalog(&tx).unwrap();
        assert_eq!(indexes.len(), 0);
        assert_eq!(sequences.len(), 0);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0], info);

        tx.commit().unwrap();
    }

    #[test]
    fn test_index_entry_roundtrip() {
        let engine = MemoryEngine::new();
        let tx = Transaction::new(engine.begin(true).unwrap());
        init(&tx).unwrap();

        let mut info = IndexInfo::new("users", vec![Path::field("a"), Path::field("b")])
            .with_name("users_a_b_idx")
            .unique();
        info.types = vec![ValueType::Integer, ValueType::Any];
        info.constraint_path = Some(Path::field("a"));

        insert_index(&tx, &mut info).unwrap();

        let (_, indexes, _) = load_catalog(&tx).unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0], info);

        tx.commit().unwrap();
    }

    #[test]
    fn test_duplicate_entry_maps_to_already_exists() {
        let engine = MemoryEngine::new();
        let tx = Transaction::new(engine.begin(true).unwrap());
        init(&tx).unwrap();

        let mut info = TableInfo::new("t");
        insert_table(&tx, &mut info).unwrap();

        let mut clash = TableInfo::new("t");
        assert!(matches!(
            insert_table(&tx, &mut clash),
            Err(Error::AlreadyExists { .. })
        ));

        // an index cannot take a table's name either
        let mut idx = IndexInfo::new("other", vec![Path::field("x")]).with_name("t");
        assert!(matches!(
            insert_index(&tx, &mut idx),
            Err(Error::AlreadyExists { .. })
        ));

        tx.commit().unwrap();
    }
}
