//! WHERE-clause to range-scan rewriting.
//!
//! The planner splits a WHERE predicate into AND-conjuncts, turns each
//! `path op literal` conjunct into candidate ranges over the primary key
//! or over an index whose first column matches the path, and picks the
//! cheapest access path by range cost. The winning conjunct is removed
//! from the residual filter when its ranges are exact; everything else
//! stays a filter.

use tracing::debug;

use heron_types::Value;

use heron_core::{Catalog, Result};

use crate::expr::{BinaryOperator, Expr};
use crate::range::{IndexRange, IndexRanges, ValueRange, ValueRanges};
use crate::stream::Source;

/// One rewritable conjunct: `path op value`.
struct Candidate {
    conjunct_index: usize,
    source: Source,
    cost: usize,
    exact_only: bool,
}

/// Builds the scan source for a table filtered by `filter`, rewriting an
/// index-amenable conjunct into an index or primary-key scan. Returns
/// the source and the residual filter.
pub fn plan_scan(
    catalog: &Catalog,
    table: &str,
    filter: Option<Expr>,
) -> Result<(Source, Option<Expr>)> {
    let seq = Source::Seq {
        table: table.to_string(),
    };

    let filter = match filter {
        Some(f) => f,
        None => return Ok((seq, None)),
    };

    let conjuncts = split_conjuncts(&filter);
    let candidate = match best_candidate(catalog, table, &conjuncts)? {
        Some(c) => c,
        None => return Ok((seq, Some(filter))),
    };

    debug!(
        table,
        cost = candidate.cost,
        "rewrote filter conjunct into range scan"
    );

    // an exact range makes its conjunct redundant
    let residual = if candidate.exact_only {
        let rest: Vec<Expr> = conjuncts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != candidate.conjunct_index)
            .map(|(_, e)| (*e).clone())
            .collect();
        join_conjuncts(rest)
    } else {
        Some(filter)
    };

    Ok((candidate.source, residual))
}

fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOperator::And,
            left,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        other => vec![other],
    }
}

fn join_conjuncts(mut exprs: Vec<Expr>) -> Option<Expr> {
    let mut out = exprs.pop()?;
    while let Some(e) = exprs.pop() {
        out = Expr::binary(BinaryOperator::And, e, out);
    }
    Some(out)
}

fn best_candidate(
    catalog: &Catalog,
    table: &str,
    conjuncts: &[&Expr],
) -> Result<Option<Candidate>> {
    let info = catalog.table_info(table)?;
    let pk_path = info.primary_key().map(|fc| fc.path.clone());
    let indexes = catalog.list_indexes(Some(table));

    let mut best: Option<Candidate> = None;

    for (i, conjunct) in conjuncts.iter().enumerate() {
        let (path, op, value) = match comparison_parts(conjunct) {
            Some(parts) => parts,
            None => continue,
        };

        // primary-key candidate
        if pk_path.as_ref() == Some(path) {
            if let Some(ranges) = pk_ranges(op, &value) {
                let cost = ranges.cost();
                let exact_only = ranges.0.iter().all(|r| r.exact);
                consider(
                    &mut best,
                    Candidate {
                        conjunct_index: i,
                        source: Source::Pk {
                            table: table.to_string(),
                            ranges,
                        },
                        cost,
                        exact_only,
                    },
                );
            }
        }

        // index candidates: first column must match the path
        for index_name in &indexes {
            let idx_info = catalog.index_info(index_name)?;
            if idx_info.paths.first() != Some(path) {
                continue;
            }
            if let Some(ranges) = index_ranges(op, &value) {
                let cost = ranges.cost();
                let exact_only = ranges.0.iter().all(|r| r.exact);
                let dedup = ranges.0.len() > 1;
                consider(
                    &mut best,
                    Candidate {
                        conjunct_index: i,
                        source: Source::Index {
                            index: index_name.clone(),
                            ranges,
                            reverse: false,
                            dedup,
                        },
                        cost,
                        exact_only,
                    },
                );
            }
        }
    }

    Ok(best)
}

fn consider(best: &mut Option<Candidate>, candidate: Candidate) {
    let replace = match best {
        None => true,
        Some(b) => candidate.cost < b.cost,
    };
    if replace {
        *best = Some(candidate);
    }
}

/// Matches `path op literal` (or the mirrored form) for the operators
/// the planner can turn into ranges.
fn comparison_parts(expr: &Expr) -> Option<(&heron_types::path::Path, BinaryOperator, Value)> {
    let (op, left, right) = match expr {
        Expr::Binary { op, left, right } if op.is_comparison() => (*op, left, right),
        _ => return None,
    };

    match (left.as_ref(), right.as_ref()) {
        (Expr::Path(path), Expr::Literal(v)) => Some((path, op, v.clone())),
        (Expr::Literal(v), Expr::Path(path)) => Some((path, mirror(op)?, v.clone())),
        (Expr::Path(path), Expr::List(items)) if op == BinaryOperator::In => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Expr::Literal(v) => values.push(v.clone()),
                    _ => return None,
                }
            }
            Some((path, BinaryOperator::In, list_value(values)))
        }
        _ => None,
    }
}

fn mirror(op: BinaryOperator) -> Option<BinaryOperator> {
    Some(match op {
        BinaryOperator::Eq => BinaryOperator::Eq,
        BinaryOperator::Neq => BinaryOperator::Neq,
        BinaryOperator::Gt => BinaryOperator::Lt,
        BinaryOperator::Gte => BinaryOperator::Lte,
        BinaryOperator::Lt => BinaryOperator::Gt,
        BinaryOperator::Lte => BinaryOperator::Gte,
        _ => return None,
    })
}

fn list_value(values: Vec<Value>) -> Value {
    let mut vb = heron_types::document::ValueBuffer::new();
    for v in values {
        vb.push(v);
    }
    vb.into_value()
}

fn pk_ranges(op: BinaryOperator, value: &Value) -> Option<ValueRanges> {
    // NULL never matches a comparison
    if value.is_null() {
        return None;
    }

    let mut ranges = ValueRanges::default();
    match op {
        BinaryOperator::Eq => ranges.append(ValueRange::exact(value.clone())),
        BinaryOperator::Gt => ranges.append(ValueRange::greater(value.clone(), true)),
        BinaryOperator::Gte => ranges.append(ValueRange::greater(value.clone(), false)),
        BinaryOperator::Lt => ranges.append(ValueRange::less(value.clone(), true)),
        BinaryOperator::Lte => ranges.append(ValueRange::less(value.clone(), false)),
        BinaryOperator::In => {
            for v in in_list(value)? {
                ranges.append(ValueRange::exact(v));
            }
        }
        // != and NOT IN stay filters
        _ => return None,
    }
    Some(ranges)
}

fn index_ranges(op: BinaryOperator, value: &Value) -> Option<IndexRanges> {
    if value.is_null() {
        return None;
    }

    let mut ranges = IndexRanges::default();
    match op {
        BinaryOperator::Eq => ranges.append(IndexRange::exact(vec![value.clone()])),
        BinaryOperator::Gt => ranges.append(IndexRange::greater(vec![value.clone()], true)),
        BinaryOperator::Gte => ranges.append(IndexRange::greater(vec![value.clone()], false)),
        BinaryOperator::Lt => ranges.append(IndexRange::less(vec![value.clone()], true)),
        BinaryOperator::Lte => ranges.append(IndexRange::less(vec![value.clone()], false)),
        BinaryOperator::In => {
            for v in in_list(value)? {
                ranges.append(IndexRange::exact(vec![v]));
            }
        }
        _ => return None,
    }
    Some(ranges)
}

fn in_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(a) => heron_types::document::array_values(a.as_ref()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use heron_kv::{Engine as _, MemoryEngine};

    use heron_core::info::{FieldConstraint, IndexInfo, TableInfo};
    use heron_core::system;
    use heron_core::Transaction;

    use heron_types::path::Path;
    use heron_types::ValueType;

    use super::*;

    fn setup(engine: &MemoryEngine) -> (Catalog, Transaction<'_>) {
        let tx = Transaction::new(engine.begin(true).unwrap());
        system::init(&tx).unwrap();
        let catalog = Catalog::new();
        let (t, i, s) = system::load_catalog(&tx).unwrap();
        catalog.load(t, i, s);
        (catalog, tx)
    }

    fn eq(path: &str, v: i64) -> Expr {
        Expr::binary(BinaryOperator::Eq, Expr::field(path), Expr::integer(v))
    }

    #[test]
    fn test_no_index_keeps_seq_scan_and_filter() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        catalog.create_table(&tx, "t", TableInfo::new("t")).unwrap();

        let (source, residual) = plan_scan(&catalog, "t", Some(eq("a", 1))).unwrap();
        assert!(matches!(source, Source::Seq { .. }));
        assert!(residual.is_some());
        tx.commit().unwrap();
    }

    #[test]
    fn test_indexed_equality_becomes_exact_index_scan() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        catalog.create_table(&tx, "t", TableInfo::new("t")).unwrap();
        catalog
            .create_index(&tx, IndexInfo::new("t", vec![Path::field("a")]))
            .unwrap();

        let (source, residual) = plan_scan(&catalog, "t", Some(eq("a", 1))).unwrap();
        match source {
            Source::Index { index, ranges, .. } => {
                assert_eq!(index, "t_a_idx");
                assert_eq!(ranges.0.len(), 1);
                assert!(ranges.0[0].exact);
            }
            other => panic!("expected index scan, got {other:?}"),
        }
        // the exact range subsumes the filter
        assert!(residual.is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn test_one_sided_range_keeps_filter() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        catalog.create_table(&tx, "t", TableInfo::new("t")).unwrap();
        catalog
            .create_index(&tx, IndexInfo::new("t", vec![Path::field("a")]))
            .unwrap();

        let gt = Expr::binary(BinaryOperator::Gt, Expr::field("a"), Expr::integer(1));
        let (source, residual) = plan_scan(&catalog, "t", Some(gt)).unwrap();
        assert!(matches!(source, Source::Index { .. }));
        assert!(residual.is_some());
        tx.commit().unwrap();
    }

    #[test]
    fn test_primary_key_beats_nothing_and_in_unfolds() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        let info = TableInfo::new("t").with_constraint(
            FieldConstraint::new(Path::field("id"))
                .with_type(ValueType::Integer)
                .primary_key(),
        );
        catalog.create_table(&tx, "t", info).unwrap();

        let in_expr = Expr::binary(
            BinaryOperator::In,
            Expr::field("id"),
            Expr::List(vec![Expr::integer(1), Expr::integer(2), Expr::integer(1)]),
        );
        let (source, residual) = plan_scan(&catalog, "t", Some(in_expr)).unwrap();
        match source {
            Source::Pk { ranges, .. } => {
                // duplicates collapse
                assert_eq!(ranges.0.len(), 2);
                assert!(ranges.0.iter().all(|r| r.exact));
            }
            other => panic!("expected pk scan, got {other:?}"),
        }
        assert!(residual.is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn test_mirrored_literal_comparison() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        catalog.create_table(&tx, "t", TableInfo::new("t")).unwrap();
        catalog
            .create_index(&tx, IndexInfo::new("t", vec![Path::field("a")]))
            .unwrap();

        // 5 > a is a < 5
        let mirrored = Expr::binary(BinaryOperator::Gt, Expr::integer(5), Expr::field("a"));
        let (source, _) = plan_scan(&catalog, "t", Some(mirrored)).unwrap();
        match source {
            Source::Index { ranges, .. } => {
                assert!(!ranges.0[0].max.is_empty());
                assert!(ranges.0[0].exclusive);
            }
            other => panic!("expected index scan, got {other:?}"),
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_cheapest_candidate_wins() {
        let engine = MemoryEngine::new();
        let (catalog, tx) = setup(&engine);
        catalog.create_table(&tx, "t", TableInfo::new("t")).unwrap();
        catalog
            .create_index(&tx, IndexInfo::new("t", vec![Path::field("a")]))
            .unwrap();
        catalog
            .create_index(&tx, IndexInfo::new("t", vec![Path::field("b")]))
            .unwrap();

        // b = 2 is exact (cost 1), a > 1 is one-sided (cost 100)
        let filter = Expr::binary(
            BinaryOperator::And,
            Expr::binary(BinaryOperator::Gt, Expr::field("a"), Expr::integer(1)),
            eq("b", 2),
        );
        let (source, residual) = plan_scan(&catalog, "t", Some(filter)).unwrap();
        match source {
            Source::Index { index, .. } => assert_eq!(index, "t_b_idx"),
            other => panic!("expected index scan, got {other:?}"),
        }
        // the residual keeps the a > 1 conjunct
        assert_eq!(residual.unwrap().to_string(), "a > 1");
        tx.commit().unwrap();
    }
}
