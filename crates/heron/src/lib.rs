//! # heron
//!
//! An embeddable SQL engine over a schemaless, document-oriented data
//! model, backed by a pluggable ordered key-value store.
//!
//! ```
//! use heron::{Database, MemoryEngine, Statement, TableInfo};
//! use heron::sql::expr::{Expr, ProjectedExpr};
//! use heron::sql::statement::{InsertStmt, SelectStmt};
//! use heron::json::parse_json_document;
//!
//! let db = Database::new(MemoryEngine::new()).unwrap();
//!
//! db.exec(&Statement::CreateTable {
//!     name: "users".to_string(),
//!     info: TableInfo::new("users"),
//! })
//! .unwrap();
//!
//! db.exec(&Statement::Insert(InsertStmt {
//!     table: "users".to_string(),
//!     rows: vec![Expr::Literal(
//!         parse_json_document(r#"{"name":"ada"}"#).unwrap().into_value(),
//!     )],
//! }))
//! .unwrap();
//!
//! let result = db
//!     .exec(&Statement::Select(SelectStmt::new(
//!         "users",
//!         vec![ProjectedExpr::new(Expr::Wildcard)],
//!     )))
//!     .unwrap();
//! assert_eq!(result.json_rows().unwrap(), vec![r#"{"name":"ada"}"#]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use tracing::debug;

use heron_core::system;
use heron_sql::statement;

pub use heron_core::info::{FieldConstraint, FieldConstraints, IndexInfo, SequenceInfo, TableInfo};
pub use heron_core::{Catalog, Error, Index, Pivot, Result, Table, Transaction};
pub use heron_kv::{Engine, MemoryEngine};
pub use heron_sql::statement::{QueryResult, Statement};
pub use heron_types::{json, path::Path, Value, ValueType};

/// The query layer, re-exported for statement construction.
pub mod sql {
    pub use heron_sql::{aggregate, expr, planner, range, statement, stream};
}

/// Database open options.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    verify_catalog_on_open: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            verify_catalog_on_open: true,
        }
    }
}

impl DatabaseOptions {
    /// The default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls the startup assertion comparing the catalog cache
    /// against the persisted catalog table. On by default.
    pub fn verify_catalog_on_open(mut self, verify: bool) -> Self {
        self.verify_catalog_on_open = verify;
        self
    }
}

/// A database handle over an ordered key-value engine.
pub struct Database {
    engine: Box<dyn Engine>,
    catalog: Arc<Catalog>,
}

impl Database {
    /// Opens a database with default options.
    pub fn new(engine: impl Engine + 'static) -> Result<Self> {
        Self::with_options(engine, DatabaseOptions::default())
    }

    /// Opens a database, creating the system stores when missing and
    /// loading the catalog.
    pub fn with_options(engine: impl Engine + 'static, options: DatabaseOptions) -> Result<Self> {
        let engine: Box<dyn Engine> = Box::new(engine);
        let catalog = Catalog::new();

        {
            let tx = Transaction::new(engine.begin(true)?);
            system::init(&tx)?;
            let (tables, indexes, sequences) = system::load_catalog(&tx)?;
            debug!(
                tables = tables.len(),
                indexes = indexes.len(),
                sequences = sequences.len(),
                "loaded catalog"
            );
            catalog.load(tables, indexes, sequences);
            if options.verify_catalog_on_open {
                catalog.verify_consistency(&tx)?;
            }
            tx.commit()?;
        }

        Ok(Database {
            engine,
            catalog: Arc::new(catalog),
        })
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Begins an explicit transaction.
    pub fn begin(&self, writable: bool) -> Result<Session<'_>> {
        Ok(Session {
            tx: Some(Transaction::new(self.engine.begin(writable)?)),
            catalog: self.catalog.clone(),
        })
    }

    /// Executes one statement in its own transaction, committing on
    /// success and rolling back on error.
    pub fn exec(&self, stmt: &Statement) -> Result<QueryResult> {
        self.exec_with_params(stmt, &[])
    }

    /// Like [`Database::exec`], with positional parameter bindings.
    pub fn exec_with_params(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        let session = self.begin(!stmt.is_read_only())?;
        match session.exec_with_params(stmt, params) {
            Ok(result) => {
                session.commit()?;
                Ok(result)
            }
            Err(e) => {
                // roll back to fire the catalog compensation hooks
                let _ = session.rollback();
                Err(e)
            }
        }
    }
}

/// An explicit transaction over a database.
///
/// Dropping a session without committing rolls it back.
pub struct Session<'d> {
    tx: Option<Transaction<'d>>,
    catalog: Arc<Catalog>,
}

impl<'d> Session<'d> {
    fn tx(&self) -> &Transaction<'d> {
        self.tx.as_ref().expect("session already closed")
    }

    /// Returns the underlying transaction.
    pub fn transaction(&self) -> &Transaction<'d> {
        self.tx()
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Executes a statement within this transaction.
    pub fn exec(&self, stmt: &Statement) -> Result<QueryResult> {
        self.exec_with_params(stmt, &[])
    }

    /// Like [`Session::exec`], with positional parameter bindings.
    pub fn exec_with_params(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        statement::execute(stmt, &self.catalog, self.tx(), params)
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> Result<()> {
        self.tx.take().expect("session already closed").commit()
    }

    /// Rolls the transaction back.
    pub fn rollback(mut self) -> Result<()> {
        self.tx.take().expect("session already closed").rollback()
    }
}
