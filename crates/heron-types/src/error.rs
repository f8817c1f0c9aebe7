//! Value-level error types.

use thiserror::Error;

use crate::types::ValueType;

/// Result type for value operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by value, document and encoding operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A document has no field with the given name.
    #[error("field not found: {field}")]
    FieldNotFound {
        /// Name of the missing field.
        field: String,
    },

    /// An array has no value at the given index.
    #[error("value not found at index {index}")]
    ValueNotFound {
        /// The out-of-bounds index.
        index: usize,
    },

    /// A cast between two value types failed.
    #[error("cannot cast {from} as {to}: {reason}")]
    Cast {
        /// Source type.
        from: ValueType,
        /// Target type.
        to: ValueType,
        /// Why the cast failed.
        reason: String,
    },

    /// JSON parsing or serialization failed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The value type has no order-preserving key encoding.
    #[error("cannot encode {ty} as key")]
    UnencodableKey {
        /// The offending type.
        ty: ValueType,
    },

    /// Stored bytes do not decode back into a value.
    #[error("corrupted encoding: {0}")]
    Corrupted(String),
}

impl Error {
    /// Builds a cast error.
    pub fn cast(from: ValueType, to: ValueType, reason: impl Into<String>) -> Self {
        Error::Cast {
            from,
            to,
            reason: reason.into(),
        }
    }
}
