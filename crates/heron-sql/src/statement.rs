//! Statement structures and execution.
//!
//! Statements are the structures a SQL parser would produce; tests and
//! embedders build them directly. Each one executes inside a live
//! transaction against the catalog.

use std::sync::Arc;

use tracing::debug;

use heron_types::document::FieldBuffer;
use heron_types::path::Path;
use heron_types::Value;

use heron_core::info::{FieldConstraint, IndexInfo, TableInfo};
use heron_core::{Catalog, Error, Result, Transaction};

use crate::aggregate::AggregateFunc;
use crate::expr::{Environment, Expr, ProjectedExpr};
use crate::planner;
use crate::stream::{Operator, Source, Stream, StreamContext};

/// Rows selected into the mutation buffer before being written back.
/// Updating through a buffer avoids invalidating the scan that feeds it.
const MUTATION_BUFFER_SIZE: usize = 100;

/// An executable statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// `CREATE TABLE`.
    CreateTable {
        /// Table name.
        name: String,
        /// Declared metadata; constraints are inferred on execution.
        info: TableInfo,
    },
    /// `DROP TABLE`.
    DropTable {
        /// Table name.
        name: String,
    },
    /// `CREATE INDEX`.
    CreateIndex {
        /// Index metadata; the name may be empty.
        info: IndexInfo,
    },
    /// `DROP INDEX`.
    DropIndex {
        /// Index name.
        name: String,
    },
    /// `CREATE SEQUENCE`.
    CreateSequence {
        /// Sequence name.
        name: String,
    },
    /// `DROP SEQUENCE`.
    DropSequence {
        /// Sequence name.
        name: String,
    },
    /// `ALTER TABLE ... RENAME TO`.
    RenameTable {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
    /// `ALTER TABLE ... ADD FIELD`.
    AddFieldConstraint {
        /// Table name.
        table: String,
        /// The added constraint.
        constraint: FieldConstraint,
    },
    /// `INSERT`.
    Insert(InsertStmt),
    /// `UPDATE`.
    Update(UpdateStmt),
    /// `DELETE`.
    Delete(DeleteStmt),
    /// `SELECT`.
    Select(SelectStmt),
    /// `REINDEX`.
    Reindex(ReindexStmt),
}

impl Statement {
    /// Returns true when the statement performs no writes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
}

/// `INSERT INTO table VALUES ...`.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    /// Target table.
    pub table: String,
    /// One expression per row; each must evaluate to a document.
    pub rows: Vec<Expr>,
}

/// `UPDATE table SET/UNSET ... WHERE ...`.
#[derive(Debug, Clone, Default)]
pub struct UpdateStmt {
    /// Target table.
    pub table: String,
    /// SET pairs, evaluated against each matching row.
    pub set: Vec<(String, Expr)>,
    /// UNSET field names.
    pub unset: Vec<String>,
    /// Row predicate.
    pub filter: Option<Expr>,
}

/// `DELETE FROM table WHERE ...`.
#[derive(Debug, Clone, Default)]
pub struct DeleteStmt {
    /// Target table.
    pub table: String,
    /// Row predicate.
    pub filter: Option<Expr>,
}

/// `ORDER BY path [ASC|DESC]`.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// Sort key path.
    pub path: Path,
    /// Descending order.
    pub descending: bool,
}

/// `SELECT ... FROM ...`.
#[derive(Debug, Clone)]
pub struct SelectStmt {
    /// Source table; None selects over a single empty row.
    pub table: Option<String>,
    /// Projected expressions.
    pub projections: Vec<ProjectedExpr>,
    /// WHERE predicate.
    pub filter: Option<Expr>,
    /// GROUP BY expression.
    pub group_by: Option<Expr>,
    /// ORDER BY clause.
    pub order_by: Option<OrderBy>,
    /// DISTINCT flag.
    pub distinct: bool,
    /// OFFSET expression.
    pub offset: Option<Expr>,
    /// LIMIT expression.
    pub limit: Option<Expr>,
}

impl SelectStmt {
    /// Selects `projections` from `table`.
    pub fn new(table: impl Into<String>, projections: Vec<ProjectedExpr>) -> Self {
        SelectStmt {
            table: Some(table.into()),
            projections,
            filter: None,
            group_by: None,
            order_by: None,
            distinct: false,
            offset: None,
            limit: None,
        }
    }

    /// Selects expressions without a table.
    pub fn without_table(projections: Vec<ProjectedExpr>) -> Self {
        SelectStmt {
            table: None,
            projections,
            filter: None,
            group_by: None,
            order_by: None,
            distinct: false,
            offset: None,
            limit: None,
        }
    }
}

/// `REINDEX` target.
#[derive(Debug, Clone)]
pub enum ReindexStmt {
    /// Rebuild every index.
    All,
    /// Rebuild one index, or every index of a table.
    Target(String),
}

/// Materialized statement output.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Output documents, in emission order.
    pub rows: Vec<FieldBuffer>,
}

impl QueryResult {
    /// Number of output rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the statement produced no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders each row as canonical JSON.
    pub fn json_rows(&self) -> Result<Vec<String>> {
        self.rows
            .iter()
            .map(|doc| Ok(heron_types::json::document_to_json_string(doc)?))
            .collect()
    }
}

/// Executes a statement inside a transaction.
pub fn execute(
    stmt: &Statement,
    catalog: &Catalog,
    tx: &Transaction<'_>,
    params: &[Value],
) -> Result<QueryResult> {
    match stmt {
        Statement::CreateTable { name, info } => {
            catalog.create_table(tx, name, info.clone())?;
            Ok(QueryResult::default())
        }
        Statement::DropTable { name } => {
            catalog.drop_table(tx, name)?;
            Ok(QueryResult::default())
        }
        Statement::CreateIndex { info } => {
            catalog.create_index(tx, info.clone())?;
            Ok(QueryResult::default())
        }
        Statement::DropIndex { name } => {
            catalog.drop_index(tx, name)?;
            Ok(QueryResult::default())
        }
        Statement::CreateSequence { name } => {
            catalog.create_sequence(tx, heron_core::info::SequenceInfo::new(name.clone()))?;
            Ok(QueryResult::default())
        }
        Statement::DropSequence { name } => {
            catalog.drop_sequence(tx, name)?;
            Ok(QueryResult::default())
        }
        Statement::RenameTable { old, new } => {
            catalog.rename_table(tx, old, new)?;
            Ok(QueryResult::default())
        }
        Statement::AddFieldConstraint { table, constraint } => {
            catalog.add_field_constraint(tx, table, constraint.clone())?;
            Ok(QueryResult::default())
        }
        Statement::Insert(insert) => execute_insert(insert, catalog, tx, params),
        Statement::Update(update) => execute_update(update, catalog, tx, params),
        Statement::Delete(delete) => execute_delete(delete, catalog, tx, params),
        Statement::Select(select) => execute_select(select, catalog, tx, params),
        Statement::Reindex(reindex) => execute_reindex(reindex, catalog, tx),
    }
}

fn execute_insert(
    stmt: &InsertStmt,
    catalog: &Catalog,
    tx: &Transaction<'_>,
    params: &[Value],
) -> Result<QueryResult> {
    let tb = catalog.get_table(tx, &stmt.table)?;
    let env = Environment::with_params(params);

    for row in &stmt.rows {
        match row.eval(&env)? {
            Value::Document(doc) => {
                tb.insert(doc.as_ref())?;
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "INSERT expects documents, got {}",
                    other.value_type()
                )))
            }
        }
    }

    debug!(table = %stmt.table, rows = stmt.rows.len(), "inserted");
    Ok(QueryResult::default())
}

/// Collects up to [`MUTATION_BUFFER_SIZE`] matching rows starting at
/// `seek`, so mutations never run under the scan that found them.
fn collect_batch(
    tb: &heron_core::Table<'_>,
    filter: &Option<Expr>,
    params: &[Value],
    seek: &[u8],
) -> Result<Vec<(Vec<u8>, FieldBuffer)>> {
    let mut batch = Vec::new();
    let mut env = Environment::with_params(params);

    let res = tb.iterate_from(seek, |key, doc| {
        env.set_row(key.to_vec(), Arc::new(doc.clone()));
        if let Some(f) = filter {
            if !f.eval_truthy(&env)? {
                return Ok(());
            }
        }
        batch.push((key.to_vec(), doc.clone()));
        if batch.len() >= MUTATION_BUFFER_SIZE {
            return Err(Error::Stop);
        }
        Ok(())
    });
    match res {
        Ok(()) => {}
        Err(e) if e.is_stop() => {}
        Err(e) => return Err(e),
    }
    Ok(batch)
}

/// The smallest key strictly after `key` in byte order.
fn key_after(mut key: Vec<u8>) -> Vec<u8> {
    key.push(0x00);
    key
}

fn execute_update(
    stmt: &UpdateStmt,
    catalog: &Catalog,
    tx: &Transaction<'_>,
    params: &[Value],
) -> Result<QueryResult> {
    if stmt.set.is_empty() && stmt.unset.is_empty() {
        return Err(Error::InvalidArgument(
            "UPDATE without SET or UNSET".to_string(),
        ));
    }

    let tb = catalog.get_table(tx, &stmt.table)?;
    let mut seek: Vec<u8> = Vec::new();
    let mut updated = 0usize;

    loop {
        let batch = collect_batch(&tb, &stmt.filter, params, &seek)?;

        for (key, doc) in &batch {
            let mut env = Environment::with_params(params);
            env.set_row(key.clone(), Arc::new(doc.clone()));

            let mut new_doc = doc.clone();
            for (field, expr) in &stmt.set {
                new_doc.set_field(field.clone(), expr.eval(&env)?);
            }
            for field in &stmt.unset {
                new_doc.remove_field(field);
            }

            tb.replace(key, &new_doc)?;
            updated += 1;
        }

        if batch.len() < MUTATION_BUFFER_SIZE {
            break;
        }
        match batch.last() {
            Some((last_key, _)) => seek = key_after(last_key.clone()),
            None => break,
        }
    }

    debug!(table = %stmt.table, rows = updated, "updated");
    Ok(QueryResult::default())
}

fn execute_delete(
    stmt: &DeleteStmt,
    catalog: &Catalog,
    tx: &Transaction<'_>,
    params: &[Value],
) -> Result<QueryResult> {
    let tb = catalog.get_table(tx, &stmt.table)?;
    let mut seek: Vec<u8> = Vec::new();
    let mut deleted = 0usize;

    loop {
        let batch = collect_batch(&tb, &stmt.filter, params, &seek)?;

        for (key, _) in &batch {
            tb.delete(key)?;
            deleted += 1;
        }

        if batch.len() < MUTATION_BUFFER_SIZE {
            break;
        }
        match batch.last() {
            Some((last_key, _)) => seek = key_after(last_key.clone()),
            None => break,
        }
    }

    debug!(table = %stmt.table, rows = deleted, "deleted");
    Ok(QueryResult::default())
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<AggregateFunc>) {
    match expr {
        Expr::Aggregate(func) => {
            if !out.iter().any(|f| f.to_string() == func.to_string()) {
                out.push(func.clone());
            }
        }
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Not(inner) | Expr::Cast { expr: inner, .. } => collect_aggregates(inner, out),
        Expr::List(items) => {
            for item in items {
                collect_aggregates(item, out);
            }
        }
        _ => {}
    }
}

/// Builds the fixed SELECT pipeline:
/// scan, filter, group, aggregate, project, distinct, sort, skip, take.
fn plan_select(catalog: &Catalog, stmt: &SelectStmt) -> Result<Stream> {
    let mut stream = match &stmt.table {
        Some(table) => {
            let (source, residual) = planner::plan_scan(catalog, table, stmt.filter.clone())?;
            let mut s = Stream {
                source,
                operators: Vec::new(),
            };
            if let Some(f) = residual {
                s = s.pipe(Operator::Filter(f));
            }
            s
        }
        None => Stream {
            source: Source::Values {
                exprs: vec![Expr::Literal(FieldBuffer::new().into_value())],
            },
            operators: Vec::new(),
        },
    };

    let mut aggregates = Vec::new();
    for pexpr in &stmt.projections {
        collect_aggregates(&pexpr.expr, &mut aggregates);
    }

    if let Some(group) = &stmt.group_by {
        stream = stream.pipe(Operator::GroupBy(group.clone()));
    }
    if stmt.group_by.is_some() || !aggregates.is_empty() {
        stream = stream.pipe(Operator::HashAggregate(aggregates));
    }

    stream = stream.pipe(Operator::Project(stmt.projections.clone()));

    if stmt.distinct {
        stream = stream.pipe(Operator::Distinct);
    }
    if let Some(order) = &stmt.order_by {
        stream = stream.pipe(Operator::Sort {
            path: order.path.clone(),
            reverse: order.descending,
        });
    }
    if let Some(offset) = &stmt.offset {
        stream = stream.pipe(Operator::Skip(offset.clone()));
    }
    if let Some(limit) = &stmt.limit {
        stream = stream.pipe(Operator::Take(limit.clone()));
    }

    Ok(stream)
}

fn execute_select(
    stmt: &SelectStmt,
    catalog: &Catalog,
    tx: &Transaction<'_>,
    params: &[Value],
) -> Result<QueryResult> {
    let stream = plan_select(catalog, stmt)?;
    let ctx = StreamContext {
        tx,
        catalog,
        params,
    };

    let mut result = QueryResult::default();
    stream.iterate(&ctx, |env| {
        let doc = env
            .document()
            .ok_or_else(|| Error::Corrupted("projected row without document".to_string()))?;
        result.rows.push(FieldBuffer::from_document(doc.as_ref())?);
        Ok(())
    })?;
    Ok(result)
}

fn execute_reindex(
    stmt: &ReindexStmt,
    catalog: &Catalog,
    tx: &Transaction<'_>,
) -> Result<QueryResult> {
    match stmt {
        ReindexStmt::All => catalog.reindex_all(tx)?,
        ReindexStmt::Target(name) => {
            if catalog.index_info(name).is_ok() {
                catalog.reindex(tx, name)?;
            } else if catalog.table_info(name).is_ok() {
                for index in catalog.list_indexes(Some(name)) {
                    catalog.reindex(tx, &index)?;
                }
            } else {
                return Err(Error::IndexNotFound { name: name.clone() });
            }
        }
    }
    Ok(QueryResult::default())
}
