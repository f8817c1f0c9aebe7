//! Named monotonic sequences.
//!
//! Counters live as rows of the mutable `__genji_sequence` system table,
//! so increments are persisted with the owning transaction and can be
//! inspected with a plain SELECT.

use heron_types::document::{Document, FieldBuffer};
use heron_types::{key, Value};

use crate::error::{Error, Result};
use crate::info::SequenceInfo;
use crate::system;
use crate::transaction::Transaction;

/// A named sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// The sequence metadata.
    pub info: SequenceInfo,
}

impl Sequence {
    /// Wraps sequence metadata.
    pub fn new(info: SequenceInfo) -> Self {
        Self { info }
    }

    /// Creates the counter row, starting at zero.
    pub fn init(&self, tx: &Transaction<'_>) -> Result<()> {
        let table = system::sequence_table(tx)?;
        let mut doc = FieldBuffer::new();
        doc.add("name", Value::text(self.info.name.clone()));
        doc.add("seq", Value::Integer(0));
        table.insert(&doc)?;
        Ok(())
    }

    /// Returns the next value, persisting the increment.
    pub fn next(&self, tx: &Transaction<'_>) -> Result<i64> {
        let table = system::sequence_table(tx)?;
        let row_key = key::encode_key(&Value::text(self.info.name.clone()))?;

        let current = match table.get(&row_key) {
            Ok(doc) => match doc.get_by_field("seq")? {
                Value::Integer(i) => i,
                other => {
                    return Err(Error::Corrupted(format!(
                        "sequence {} holds a non-integer counter: {other:?}",
                        self.info.name
                    )))
                }
            },
            Err(Error::KeyNotFound) => {
                return Err(Error::SequenceNotFound {
                    name: self.info.name.clone(),
                })
            }
            Err(e) => return Err(e),
        };

        let next = current + 1;
        let mut doc = FieldBuffer::new();
        doc.add("name", Value::text(self.info.name.clone()));
        doc.add("seq", Value::Integer(next));
        table.replace(&row_key, &doc)?;
        Ok(next)
    }

    /// Removes the counter row.
    pub fn drop_counter(&self, tx: &Transaction<'_>) -> Result<()> {
        let table = system::sequence_table(tx)?;
        let row_key = key::encode_key(&Value::text(self.info.name.clone()))?;
        match table.delete(&row_key) {
            Ok(()) | Err(Error::KeyNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
