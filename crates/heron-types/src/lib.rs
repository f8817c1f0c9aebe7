//! # heron-types
//!
//! The document value model shared by every heron crate.
//!
//! This crate implements:
//! - Tagged runtime values with SQL comparison and arithmetic semantics
//! - Documents, arrays and structured paths
//! - Casting between value types
//! - JSON conversion
//! - Order-preserving binary key encoding

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod types;

/// Runtime values and their comparison/arithmetic semantics.
pub mod value;

/// Casting rules between value types.
pub mod cast;

/// Document and array abstractions plus growable buffers.
pub mod document;

/// Structured field references.
pub mod path;

/// JSON conversion for values and documents.
pub mod json;

/// Order-preserving key encoding and composite tuples.
pub mod key;

/// Binary storage codec for documents.
pub mod codec;

pub use error::{Error, Result};
pub use types::ValueType;
pub use value::Value;
