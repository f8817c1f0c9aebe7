//! The stream pipeline and its operators.
//!
//! A stream is a source followed by a chain of operators. Iterating the
//! stream pushes one environment per row through the chain; operators
//! that must see their whole input (sort, aggregation) buffer rows and
//! flush when the source is exhausted. Early termination travels as an
//! internal sentinel which never escapes to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use heron_types::document::{Document, FieldBuffer};
use heron_types::path::Path;
use heron_types::{codec, Value};

use heron_core::{Catalog, Error, Result, Transaction};

use crate::aggregate::{Accumulator, AggregateFunc};
use crate::expr::{Environment, Expr, ProjectedExpr};
use crate::range::{IndexRanges, ValueRanges};

/// Everything a stream needs to touch the database.
pub struct StreamContext<'t, 'e> {
    /// The active transaction.
    pub tx: &'t Transaction<'e>,
    /// The catalog.
    pub catalog: &'t Catalog,
    /// Positional parameter bindings.
    pub params: &'t [Value],
}

/// The row producer at the head of a stream.
#[derive(Debug, Clone)]
pub enum Source {
    /// Every row of a table, in key order.
    Seq {
        /// Table to scan.
        table: String,
    },
    /// Rows whose index entries fall in the given ranges.
    Index {
        /// Index to scan.
        index: String,
        /// Tuple ranges to visit.
        ranges: IndexRanges,
        /// Scan in descending order.
        reverse: bool,
        /// Drop duplicate rows appearing in several ranges.
        dedup: bool,
    },
    /// Rows whose primary keys fall in the given ranges.
    Pk {
        /// Table to scan.
        table: String,
        /// Key ranges to visit.
        ranges: ValueRanges,
    },
    /// One row per expression; each must evaluate to a document.
    Values {
        /// Row expressions.
        exprs: Vec<Expr>,
    },
}

/// A pipeline operator.
#[derive(Debug, Clone)]
pub enum Operator {
    /// Drops rows whose predicate is not boolean-true.
    Filter(Expr),
    /// Replaces the current document with named expressions.
    Project(Vec<ProjectedExpr>),
    /// Materializes and sorts by a path; missing fields sort as NULL.
    Sort {
        /// Sort key path.
        path: Path,
        /// Descending order.
        reverse: bool,
    },
    /// Establishes the grouping key for downstream aggregation.
    GroupBy(Expr),
    /// Accumulates per-group state and emits one row per group.
    HashAggregate(Vec<AggregateFunc>),
    /// Drops duplicate documents.
    Distinct,
    /// Skips the first `n` rows.
    Skip(Expr),
    /// Emits at most `n` rows, then stops the scan.
    Take(Expr),
}

/// A pull-based pipeline of operators over a source.
#[derive(Debug, Clone)]
pub struct Stream {
    /// The row producer.
    pub source: Source,
    /// Operators applied in order.
    pub operators: Vec<Operator>,
}

impl Stream {
    /// A stream scanning a whole table.
    pub fn seq_scan(table: impl Into<String>) -> Self {
        Stream {
            source: Source::Seq {
                table: table.into(),
            },
            operators: Vec::new(),
        }
    }

    /// A stream scanning an index over the given ranges.
    pub fn index_scan(index: impl Into<String>, ranges: IndexRanges) -> Self {
        Stream {
            source: Source::Index {
                index: index.into(),
                ranges,
                reverse: false,
                dedup: false,
            },
            operators: Vec::new(),
        }
    }

    /// A stream scanning primary keys over the given ranges.
    pub fn pk_scan(table: impl Into<String>, ranges: ValueRanges) -> Self {
        Stream {
            source: Source::Pk {
                table: table.into(),
                ranges,
            },
            operators: Vec::new(),
        }
    }

    /// A stream producing one row per document expression.
    pub fn values(exprs: Vec<Expr>) -> Self {
        Stream {
            source: Source::Values { exprs },
            operators: Vec::new(),
        }
    }

    /// Appends an operator.
    pub fn pipe(mut self, op: Operator) -> Self {
        self.operators.push(op);
        self
    }

    /// Runs the pipeline, calling `f` once per produced row.
    pub fn iterate(
        &self,
        ctx: &StreamContext<'_, '_>,
        mut f: impl FnMut(&Environment) -> Result<()>,
    ) -> Result<()> {
        let mut stages = self.build_stages(ctx)?;

        let result = (|| {
            iterate_source(&self.source, ctx, &mut |env| {
                feed(&mut stages, env, &mut f)
            })?;
            finish_chain(&mut stages, &mut f)
        })();

        match result {
            Err(e) if e.is_stop() => Ok(()),
            other => other,
        }
    }

    fn build_stages(&self, ctx: &StreamContext<'_, '_>) -> Result<Vec<Stage>> {
        let mut stages = Vec::with_capacity(self.operators.len());
        let mut grouped = false;

        for op in &self.operators {
            stages.push(match op {
                Operator::Filter(expr) => Stage::Filter { expr: expr.clone() },
                Operator::Project(exprs) => Stage::Project {
                    exprs: exprs.clone(),
                },
                Operator::Sort { path, reverse } => Stage::Sort {
                    path: path.clone(),
                    reverse: *reverse,
                    rows: Vec::new(),
                },
                Operator::GroupBy(expr) => {
                    grouped = true;
                    Stage::GroupBy { expr: expr.clone() }
                }
                Operator::HashAggregate(builders) => Stage::Aggregate {
                    builders: builders.clone(),
                    grouped,
                    base_env: Environment::with_params(ctx.params),
                    buckets: Vec::new(),
                    bucket_index: HashMap::new(),
                },
                Operator::Distinct => Stage::Distinct {
                    seen: HashSet::new(),
                },
                Operator::Skip(expr) => Stage::Skip {
                    n: eval_count(expr, ctx, "OFFSET")?,
                    seen: 0,
                },
                Operator::Take(expr) => Stage::Take {
                    n: eval_count(expr, ctx, "LIMIT")?,
                    emitted: 0,
                },
            });
        }
        Ok(stages)
    }
}

/// LIMIT and OFFSET arguments must be numeric.
fn eval_count(expr: &Expr, ctx: &StreamContext<'_, '_>, clause: &str) -> Result<i64> {
    let env = Environment::with_params(ctx.params);
    let n = match expr.eval(&env)? {
        Value::Integer(i) => i,
        Value::Double(d) => d as i64,
        other => {
            return Err(Error::InvalidArgument(format!(
                "{clause} expects a number, got {}",
                other.value_type()
            )))
        }
    };
    if n < 0 {
        return Err(Error::InvalidArgument(format!(
            "{clause} must not be negative"
        )));
    }
    Ok(n)
}

type Sink<'s> = dyn FnMut(&Environment) -> Result<()> + 's;

fn feed(stages: &mut [Stage], env: &Environment, f: &mut Sink<'_>) -> Result<()> {
    match stages.split_first_mut() {
        None => f(env),
        Some((head, rest)) => head.process(env, &mut |e| feed(rest, e, f)),
    }
}

fn finish_chain(stages: &mut [Stage], f: &mut Sink<'_>) -> Result<()> {
    if let Some((head, rest)) = stages.split_first_mut() {
        head.finish(&mut |e| feed(rest, e, f))?;
        finish_chain(rest, f)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

fn iterate_source(
    source: &Source,
    ctx: &StreamContext<'_, '_>,
    next: &mut Sink<'_>,
) -> Result<()> {
    match source {
        Source::Seq { table } => {
            let tb = ctx.catalog.get_table(ctx.tx, table)?;
            let mut env = Environment::with_params(ctx.params);
            tb.iterate(|key, doc| {
                env.set_row(key.to_vec(), Arc::new(doc.clone()));
                next(&env)
            })
        }
        Source::Values { exprs } => {
            let base = Environment::with_params(ctx.params);
            let mut env = base.clone();
            for expr in exprs {
                match expr.eval(&base)? {
                    Value::Document(doc) => {
                        env.set_document(doc);
                        next(&env)?;
                    }
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "expected a document, got {}",
                            other.value_type()
                        )))
                    }
                }
            }
            Ok(())
        }
        Source::Pk { table, ranges } => iterate_pk_source(table, ranges, ctx, next),
        Source::Index {
            index,
            ranges,
            reverse,
            dedup,
        } => iterate_index_source(index, ranges, *reverse, *dedup, ctx, next),
    }
}

fn iterate_pk_source(
    table: &str,
    ranges: &ValueRanges,
    ctx: &StreamContext<'_, '_>,
    next: &mut Sink<'_>,
) -> Result<()> {
    let tb = ctx.catalog.get_table(ctx.tx, table)?;

    let mut ranges = ranges.clone();
    ranges.encode(|v| tb.encode_primary_key(v))?;

    let mut env = Environment::with_params(ctx.params);
    let mut halted = false;

    for range in &ranges.0 {
        if range.exact {
            let key = match range.encoded_min() {
                Some(key) => key,
                None => continue,
            };
            match tb.get(key) {
                Ok(doc) => {
                    env.set_row(key.to_vec(), Arc::new(doc));
                    match next(&env) {
                        Ok(()) => {}
                        Err(e) if e.is_stop() => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
            continue;
        }

        let seek = range.encoded_min().unwrap_or_default().to_vec();
        let res = tb.iterate_from(&seek, |key, doc| {
            if range.past_upper(key) {
                return Err(Error::Stop);
            }
            if !range.is_in_range(key) {
                return Ok(());
            }
            env.set_row(key.to_vec(), Arc::new(doc.clone()));
            match next(&env) {
                Err(e) if e.is_stop() => {
                    halted = true;
                    Err(Error::Stop)
                }
                other => other,
            }
        });
        match res {
            Ok(()) => {}
            Err(e) if e.is_stop() => {}
            Err(e) => return Err(e),
        }
        if halted {
            break;
        }
    }
    Ok(())
}

fn iterate_index_source(
    index: &str,
    ranges: &IndexRanges,
    reverse: bool,
    dedup: bool,
    ctx: &StreamContext<'_, '_>,
    next: &mut Sink<'_>,
) -> Result<()> {
    use heron_core::Pivot;

    let idx = ctx.catalog.get_index(ctx.tx, index)?;
    let tb = ctx.catalog.get_table(ctx.tx, &idx.info().table_name)?;

    let mut ranges = ranges.clone();
    for range in &mut ranges.0 {
        range.index_arity_max = idx.info().arity();
    }
    ranges.encode()?;

    let mut env = Environment::with_params(ctx.params);
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut halted = false;

    for range in &ranges.0 {
        let pivot = if reverse {
            if !range.max_values().is_empty() {
                Pivot::values(range.max_values().to_vec())
            } else if let Some(v) = range.pivot_value() {
                Pivot::empty_for(v)
            } else {
                Pivot::default()
            }
        } else if !range.min_values().is_empty() {
            Pivot::values(range.min_values().to_vec())
        } else if let Some(v) = range.pivot_value() {
            Pivot::empty_for(v)
        } else {
            Pivot::default()
        };

        if reverse {
            idx.descend_less_or_equal(&pivot, |entry| {
                visit_index_entry(entry, range, reverse, dedup, &mut seen, &tb, &mut env, next, &mut halted)
            })?;
        } else {
            idx.ascend_greater_or_equal(&pivot, |entry| {
                visit_index_entry(entry, range, reverse, dedup, &mut seen, &tb, &mut env, next, &mut halted)
            })?;
        }
        if halted {
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn visit_index_entry(
    entry: &heron_core::index::IndexEntry<'_>,
    range: &crate::range::IndexRange,
    reverse: bool,
    dedup: bool,
    seen: &mut HashSet<Vec<u8>>,
    tb: &heron_core::Table<'_>,
    env: &mut Environment,
    next: &mut Sink<'_>,
    halted: &mut bool,
) -> Result<()> {
    let past = if reverse {
        range.past_lower(entry.encoded)
    } else {
        range.past_upper(entry.encoded)
    };
    if past {
        return Err(Error::Stop);
    }
    if !range.is_in_range(entry.encoded) {
        return Ok(());
    }
    if dedup && !seen.insert(entry.key.to_vec()) {
        return Ok(());
    }

    let doc = tb.get(entry.key)?;
    env.set_row(entry.key.to_vec(), Arc::new(doc));
    match next(env) {
        Err(e) if e.is_stop() => {
            *halted = true;
            Err(Error::Stop)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

enum Stage {
    Filter {
        expr: Expr,
    },
    Project {
        exprs: Vec<ProjectedExpr>,
    },
    Sort {
        path: Path,
        reverse: bool,
        rows: Vec<(Value, Environment)>,
    },
    GroupBy {
        expr: Expr,
    },
    Aggregate {
        builders: Vec<AggregateFunc>,
        grouped: bool,
        base_env: Environment,
        buckets: Vec<(Option<(String, Value)>, Vec<Accumulator>)>,
        bucket_index: HashMap<Vec<u8>, usize>,
    },
    Distinct {
        seen: HashSet<Vec<u8>>,
    },
    Skip {
        n: i64,
        seen: i64,
    },
    Take {
        n: i64,
        emitted: i64,
    },
}

impl Stage {
    fn process(&mut self, env: &Environment, out: &mut Sink<'_>) -> Result<()> {
        match self {
            Stage::Filter { expr } => {
                if expr.eval_truthy(env)? {
                    out(env)?;
                }
                Ok(())
            }
            Stage::Project { exprs } => {
                let doc = project(exprs, env)?;
                let mut projected = env.clone();
                projected.set_document(Arc::new(doc));
                out(&projected)
            }
            Stage::Sort { path, rows, .. } => {
                let sort_key = match env.document() {
                    Some(doc) => path
                        .get_value_from_document(doc.as_ref())
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                };
                rows.push((sort_key, env.clone()));
                Ok(())
            }
            Stage::GroupBy { expr } => {
                let group = expr.eval(env)?;
                let mut grouped = env.clone();
                grouped.set_group(expr.to_string(), group);
                out(&grouped)
            }
            Stage::Aggregate {
                builders,
                buckets,
                bucket_index,
                ..
            } => {
                let group = env.group().cloned();
                let mut group_key = Vec::new();
                if let Some((_, v)) = &group {
                    codec::append_value(&mut group_key, v).map_err(Error::from)?;
                }

                let slot = match bucket_index.get(&group_key) {
                    Some(&i) => i,
                    None => {
                        buckets.push((
                            group,
                            builders.iter().map(AggregateFunc::accumulator).collect(),
                        ));
                        bucket_index.insert(group_key, buckets.len() - 1);
                        buckets.len() - 1
                    }
                };
                for acc in &mut buckets[slot].1 {
                    acc.aggregate(env)?;
                }
                Ok(())
            }
            Stage::Distinct { seen } => {
                let fingerprint = match env.document() {
                    Some(doc) => document_fingerprint(doc.as_ref())?,
                    None => Vec::new(),
                };
                if seen.insert(fingerprint) {
                    out(env)?;
                }
                Ok(())
            }
            Stage::Skip { n, seen } => {
                if *seen < *n {
                    *seen += 1;
                    Ok(())
                } else {
                    out(env)
                }
            }
            Stage::Take { n, emitted } => {
                if *emitted >= *n {
                    return Err(Error::Stop);
                }
                *emitted += 1;
                out(env)?;
                if *emitted >= *n {
                    return Err(Error::Stop);
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self, out: &mut Sink<'_>) -> Result<()> {
        match self {
            Stage::Sort {
                rows, reverse, ..
            } => {
                rows.sort_by(|(a, _), (b, _)| {
                    let ord = a.total_cmp(b);
                    if *reverse {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
                for (_, env) in rows.drain(..) {
                    out(&env)?;
                }
                Ok(())
            }
            Stage::Aggregate {
                builders,
                grouped,
                base_env,
                buckets,
                ..
            } => {
                // without GROUP BY, aggregation over zero rows still
                // produces one row
                if buckets.is_empty() && !*grouped {
                    buckets.push((
                        None,
                        builders.iter().map(AggregateFunc::accumulator).collect(),
                    ));
                }

                for (group, accumulators) in buckets.drain(..) {
                    let mut doc = FieldBuffer::new();
                    if let Some((label, value)) = group {
                        doc.add(label, value);
                    }
                    for (func, acc) in builders.iter().zip(accumulators.iter()) {
                        doc.add(func.to_string(), acc.finish());
                    }

                    let mut env = base_env.clone();
                    env.set_document(Arc::new(doc));
                    out(&env)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn project(exprs: &[ProjectedExpr], env: &Environment) -> Result<FieldBuffer> {
    let mut doc = FieldBuffer::new();
    let mut names = HashSet::new();

    for pexpr in exprs {
        if matches!(pexpr.expr, Expr::Wildcard) {
            if let Some(src) = env.document() {
                src.iterate(&mut |field, value| {
                    doc.add(field, value.clone());
                    Ok(())
                })
                .map_err(Error::from)?;
            }
            continue;
        }

        let name = pexpr.name();
        if !names.insert(name.clone()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate projected field {name:?}"
            )));
        }
        let value = pexpr.expr.eval(env)?;
        doc.add(name, value);
    }
    Ok(doc)
}

fn document_fingerprint(doc: &dyn Document) -> Result<Vec<u8>> {
    Ok(codec::encode_document(doc).map_err(Error::from)?)
}
