//! Database error types.

use heron_types::ValueType;
use thiserror::Error;

/// Result type for database operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the database core and the query layer.
#[derive(Debug, Error)]
pub enum Error {
    /// No table with that name.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Missing table name.
        name: String,
    },

    /// No index with that name.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Missing index name.
        name: String,
    },

    /// No sequence with that name.
    #[error("sequence not found: {name}")]
    SequenceNotFound {
        /// Missing sequence name.
        name: String,
    },

    /// A path did not resolve inside a document.
    #[error("field not found: {field}")]
    FieldNotFound {
        /// Missing field or path.
        field: String,
    },

    /// No row with that key.
    #[error("key not found")]
    KeyNotFound,

    /// A table, index or sequence with that name already exists. Names
    /// are unique across all three namespaces.
    #[error("{name} already exists")]
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },

    /// A row with the same primary key or unique-index key already
    /// exists.
    #[error("duplicate document")]
    DuplicateDocument,

    /// A NOT NULL constraint rejected a missing or null value.
    #[error("field {path} cannot be null")]
    NotNullViolation {
        /// Constrained path.
        path: String,
    },

    /// A value could not be converted to the requested type.
    #[error("cannot cast {from} as {to}: {reason}")]
    Cast {
        /// Source type.
        from: ValueType,
        /// Target type.
        to: ValueType,
        /// Why the cast failed.
        reason: String,
    },

    /// A statement argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A write was attempted on a read-only table.
    #[error("cannot write to read-only table {name}")]
    ReadOnlyTable {
        /// The read-only table.
        name: String,
    },

    /// The underlying key-value engine failed.
    #[error("engine error: {0}")]
    Engine(#[from] heron_kv::Error),

    /// Stored bytes did not decode.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Internal sentinel used to stop an iteration early. Never surfaces
    /// to callers.
    #[doc(hidden)]
    #[error("iteration stopped")]
    Stop,
}

impl Error {
    /// True for the internal early-termination sentinel.
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::Stop)
    }

    /// True when a path failed to resolve in a document.
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, Error::FieldNotFound { .. })
    }

    /// True for cast failures.
    pub fn is_cast_error(&self) -> bool {
        matches!(self, Error::Cast { .. })
    }
}

impl From<heron_types::Error> for Error {
    fn from(e: heron_types::Error) -> Self {
        match e {
            heron_types::Error::FieldNotFound { field } => Error::FieldNotFound { field },
            heron_types::Error::ValueNotFound { index } => Error::FieldNotFound {
                field: format!("[{index}]"),
            },
            heron_types::Error::Cast { from, to, reason } => Error::Cast { from, to, reason },
            heron_types::Error::Json(e) => Error::Corrupted(e.to_string()),
            heron_types::Error::UnencodableKey { ty } => {
                Error::InvalidArgument(format!("cannot use {ty} as a key"))
            }
            heron_types::Error::Corrupted(msg) => Error::Corrupted(msg),
        }
    }
}
