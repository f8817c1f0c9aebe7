//! # heron-core
//!
//! The database core: catalog, tables, indexes and transactions.
//!
//! Everything here runs against the ordered key-value abstraction of
//! `heron-kv`. The catalog keeps an in-memory cache of every table, index
//! and sequence, mirrored into a reserved catalog table within the same
//! transaction; compensating rollback hooks keep the two in sync when a
//! transaction aborts.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod varint;

/// Transactions with rollback hooks.
pub mod transaction;

/// Table, index and sequence metadata.
pub mod info;

/// The catalog and its cache.
pub mod catalog;

/// Typed row storage on top of a store.
pub mod table;

/// Ordered secondary indexes.
pub mod index;

/// Named monotonic sequences.
pub mod sequence;

/// Persistence of catalog entries in the reserved system tables.
pub mod system;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use index::{Index, Pivot};
pub use table::Table;
pub use transaction::Transaction;
