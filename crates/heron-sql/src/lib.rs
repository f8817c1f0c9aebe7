//! # heron-sql
//!
//! The query layer: expressions, ranges, the stream pipeline, the
//! planner and statement execution.
//!
//! Statements are plain structures; a SQL parser would produce them, but
//! the engine consumes them directly. Execution flows through a
//! pull-based stream of operators, each producing an ordered sequence of
//! row environments. The planner rewrites index-amenable filters into
//! range scans using the cost heuristic of the range model.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Expressions and their evaluation environment.
pub mod expr;

/// Value and index ranges with the planner cost model.
pub mod range;

/// The stream pipeline and its operators.
pub mod stream;

/// Aggregate functions and accumulators.
pub mod aggregate;

/// WHERE-clause to range-scan rewriting.
pub mod planner;

/// Statement structures and execution.
pub mod statement;

pub use heron_core::{Error, Result};
