//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by a key-value engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key does not exist in the store.
    #[error("key not found")]
    KeyNotFound,

    /// The named store does not exist.
    #[error("store not found")]
    StoreNotFound,

    /// A store with that name already exists.
    #[error("store already exists")]
    StoreAlreadyExists,

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    TransactionReadOnly,

    /// The transaction was already committed or rolled back.
    #[error("transaction already closed")]
    TransactionClosed,

    /// An engine-specific failure.
    #[error("engine failure: {0}")]
    Internal(String),
}
