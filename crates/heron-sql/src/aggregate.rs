//! Aggregate functions and accumulators.
//!
//! A function value describes the aggregate as written in the query; its
//! accumulator carries the per-group state inside the HashAggregate
//! operator. The aggregated row names each output field after the
//! function text, which is how projections find the result afterwards.

use std::fmt;

use heron_types::Value;

use heron_core::Result;

use crate::expr::{Environment, Expr};

/// An aggregate function.
#[derive(Debug, Clone)]
pub enum AggregateFunc {
    /// `COUNT(expr)`, or `COUNT(*)` when no expression is given.
    Count(Option<Box<Expr>>),
    /// `MIN(expr)`.
    Min(Box<Expr>),
    /// `MAX(expr)`.
    Max(Box<Expr>),
    /// `SUM(expr)`.
    Sum(Box<Expr>),
    /// `AVG(expr)`.
    Avg(Box<Expr>),
}

impl AggregateFunc {
    /// `COUNT(*)`.
    pub fn count_wildcard() -> Self {
        AggregateFunc::Count(None)
    }

    /// Builds the accumulator for one group.
    pub fn accumulator(&self) -> Accumulator {
        match self {
            AggregateFunc::Count(expr) => Accumulator::Count {
                expr: expr.as_deref().cloned(),
                count: 0,
            },
            AggregateFunc::Min(expr) => Accumulator::Min {
                expr: (**expr).clone(),
                min: None,
            },
            AggregateFunc::Max(expr) => Accumulator::Max {
                expr: (**expr).clone(),
                max: None,
            },
            AggregateFunc::Sum(expr) => Accumulator::Sum {
                expr: (**expr).clone(),
                sum_i: None,
                sum_f: None,
            },
            AggregateFunc::Avg(expr) => Accumulator::Avg {
                expr: (**expr).clone(),
                sum: 0.0,
                count: 0,
            },
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunc::Count(None) => f.write_str("COUNT(*)"),
            AggregateFunc::Count(Some(e)) => write!(f, "COUNT({e})"),
            AggregateFunc::Min(e) => write!(f, "MIN({e})"),
            AggregateFunc::Max(e) => write!(f, "MAX({e})"),
            AggregateFunc::Sum(e) => write!(f, "SUM({e})"),
            AggregateFunc::Avg(e) => write!(f, "AVG({e})"),
        }
    }
}

/// Per-group aggregation state.
#[derive(Debug)]
pub enum Accumulator {
    /// Counts rows, or non-NULL evaluations of the expression.
    Count {
        /// None counts every row.
        expr: Option<Expr>,
        /// Rows counted so far.
        count: i64,
    },
    /// Tracks the smallest non-NULL value.
    Min {
        /// The aggregated expression.
        expr: Expr,
        /// Current minimum.
        min: Option<Value>,
    },
    /// Tracks the largest non-NULL value.
    Max {
        /// The aggregated expression.
        expr: Expr,
        /// Current maximum.
        max: Option<Value>,
    },
    /// Sums numeric values; stays integer until a double is seen.
    Sum {
        /// The aggregated expression.
        expr: Expr,
        /// Integer sum, while no double was seen.
        sum_i: Option<i64>,
        /// Double sum, once promoted.
        sum_f: Option<f64>,
    },
    /// Averages numeric values as a double.
    Avg {
        /// The aggregated expression.
        expr: Expr,
        /// Running sum.
        sum: f64,
        /// Numeric rows seen.
        count: i64,
    },
}

impl Accumulator {
    /// Folds one row into the accumulator.
    pub fn aggregate(&mut self, env: &Environment) -> Result<()> {
        match self {
            Accumulator::Count { expr, count } => {
                match expr {
                    None => *count += 1,
                    Some(e) => {
                        if !e.eval(env)?.is_null() {
                            *count += 1;
                        }
                    }
                }
                Ok(())
            }
            Accumulator::Min { expr, min } => {
                let v = expr.eval(env)?;
                if v.is_null() {
                    return Ok(());
                }
                let replace = match min {
                    None => true,
                    Some(m) => v.total_cmp(m).is_lt(),
                };
                if replace {
                    *min = Some(v);
                }
                Ok(())
            }
            Accumulator::Max { expr, max } => {
                let v = expr.eval(env)?;
                if v.is_null() {
                    return Ok(());
                }
                let replace = match max {
                    None => true,
                    Some(m) => v.total_cmp(m).is_gt(),
                };
                if replace {
                    *max = Some(v);
                }
                Ok(())
            }
            Accumulator::Sum { expr, sum_i, sum_f } => {
                let v = expr.eval(env)?;
                match v {
                    Value::Integer(i) => match sum_f {
                        Some(f) => *f += i as f64,
                        None => {
                            let current = sum_i.unwrap_or(0);
                            match current.checked_add(i) {
                                Some(next) => *sum_i = Some(next),
                                // overflow promotes the sum to double
                                None => *sum_f = Some(current as f64 + i as f64),
                            }
                        }
                    },
                    Value::Double(d) => match sum_f {
                        Some(f) => *f += d,
                        None => *sum_f = Some(sum_i.take().unwrap_or(0) as f64 + d),
                    },
                    _ => {}
                }
                Ok(())
            }
            Accumulator::Avg { expr, sum, count } => {
                match expr.eval(env)? {
                    Value::Integer(i) => {
                        *sum += i as f64;
                        *count += 1;
                    }
                    Value::Double(d) => {
                        *sum += d;
                        *count += 1;
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    /// Produces the aggregate output.
    pub fn finish(&self) -> Value {
        match self {
            Accumulator::Count { count, .. } => Value::Integer(*count),
            Accumulator::Min { min, .. } => min.clone().unwrap_or(Value::Null),
            Accumulator::Max { max, .. } => max.clone().unwrap_or(Value::Null),
            Accumulator::Sum { sum_i, sum_f, .. } => match (sum_i, sum_f) {
                (_, Some(f)) => Value::Double(*f),
                (Some(i), None) => Value::Integer(*i),
                (None, None) => Value::Null,
            },
            Accumulator::Avg { sum, count, .. } => {
                if *count == 0 {
                    Value::Double(0.0)
                } else {
                    Value::Double(*sum / *count as f64)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use heron_types::json::parse_json_document;

    use super::*;
    use crate::expr::doc_env;

    fn feed(acc: &mut Accumulator, docs: &[&str]) {
        for json in docs {
            let env = doc_env(parse_json_document(json).unwrap(), &[]);
            acc.aggregate(&env).unwrap();
        }
    }

    #[test]
    fn test_count_wildcard_counts_all() {
        let mut acc = AggregateFunc::count_wildcard().accumulator();
        feed(&mut acc, &[r#"{"a":1}"#, r#"{"a":null}"#, r#"{}"#]);
        assert_eq!(acc.finish(), Value::Integer(3));
    }

    #[test]
    fn test_count_expr_skips_null_and_missing() {
        let mut acc = AggregateFunc::Count(Some(Box::new(Expr::field("a")))).accumulator();
        feed(&mut acc, &[r#"{"a":1}"#, r#"{"a":null}"#, r#"{"b":2}"#]);
        assert_eq!(acc.finish(), Value::Integer(1));
    }

    #[test]
    fn test_min_max_ignore_null_and_follow_type_order() {
        let mut min = AggregateFunc::Min(Box::new(Expr::field("a"))).accumulator();
        let mut max = AggregateFunc::Max(Box::new(Expr::field("a"))).accumulator();
        let docs = [r#"{"a":null}"#, r#"{"a":"z"}"#, r#"{"a":3}"#, r#"{"a":1.5}"#];
        feed(&mut min, &docs);
        feed(&mut max, &docs);
        // numbers sort below text across types
        assert_eq!(min.finish(), Value::Double(1.5));
        assert_eq!(max.finish(), Value::text("z"));
    }

    #[test]
    fn test_min_of_no_rows_is_null() {
        let acc = AggregateFunc::Min(Box::new(Expr::field("a"))).accumulator();
        assert_eq!(acc.finish(), Value::Null);
    }

    #[test]
    fn test_sum_stays_integer_until_double() {
        let mut acc = AggregateFunc::Sum(Box::new(Expr::field("a"))).accumulator();
        feed(&mut acc, &[r#"{"a":1}"#, r#"{"a":2}"#]);
        assert_eq!(acc.finish(), Value::Integer(3));

        feed(&mut acc, &[r#"{"a":0.5}"#]);
        assert_eq!(acc.finish(), Value::Double(3.5));
    }

    #[test]
    fn test_sum_of_no_numeric_rows_is_null() {
        let mut acc = AggregateFunc::Sum(Box::new(Expr::field("a"))).accumulator();
        feed(&mut acc, &[r#"{"a":"x"}"#, r#"{}"#]);
        assert_eq!(acc.finish(), Value::Null);
    }

    #[test]
    fn test_sum_overflow_promotes() {
        let mut acc = AggregateFunc::Sum(Box::new(Expr::field("a"))).accumulator();
        let big = format!(r#"{{"a":{}}}"#, i64::MAX);
        feed(&mut acc, &[&big, r#"{"a":1}"#]);
        match acc.finish() {
            Value::Double(_) => {}
            other => panic!("expected double, got {other:?}"),
        }
    }

    #[test]
    fn test_avg_is_double_and_zero_on_empty() {
        let mut acc = AggregateFunc::Avg(Box::new(Expr::field("a"))).accumulator();
        feed(&mut acc, &[r#"{"a":1}"#, r#"{"a":2}"#]);
        assert_eq!(acc.finish(), Value::Double(1.5));

        let empty = AggregateFunc::Avg(Box::new(Expr::field("a"))).accumulator();
        assert_eq!(empty.finish(), Value::Double(0.0));
    }
}
