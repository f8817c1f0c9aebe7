//! Expressions and their evaluation environment.
//!
//! Evaluation follows SQL three-valued logic: a missing field reads as
//! NULL, comparisons with NULL yield NULL, and a failed cast inside a
//! query yields NULL rather than aborting the statement.

use std::fmt;
use std::sync::Arc;

use heron_types::cast::cast_as;
use heron_types::document::{array_values, Document, FieldBuffer, ValueBuffer};
use heron_types::path::Path;
use heron_types::value::ArithmeticOp;
use heron_types::{Value, ValueType};

use heron_core::{Error, Result};

use crate::aggregate::AggregateFunc;

/// Per-row execution context: the current document, its key, parameter
/// bindings and the active group key.
#[derive(Clone, Default)]
pub struct Environment {
    doc: Option<Arc<dyn Document>>,
    key: Option<Vec<u8>>,
    params: Arc<Vec<Value>>,
    group: Option<(String, Value)>,
}

impl Environment {
    /// Creates an environment holding only parameter bindings.
    pub fn with_params(params: &[Value]) -> Self {
        Environment {
            params: Arc::new(params.to_vec()),
            ..Default::default()
        }
    }

    /// Returns the current document.
    pub fn document(&self) -> Option<&Arc<dyn Document>> {
        self.doc.as_ref()
    }

    /// Returns the row key of the current document, when it came from a
    /// table.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Returns the positional parameters.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Returns the group label and key set by a GroupBy operator.
    pub fn group(&self) -> Option<&(String, Value)> {
        self.group.as_ref()
    }

    /// Replaces the current document.
    pub fn set_document(&mut self, doc: Arc<dyn Document>) {
        self.doc = Some(doc);
    }

    /// Replaces the current document and its row key.
    pub fn set_row(&mut self, key: Vec<u8>, doc: Arc<dyn Document>) {
        self.key = Some(key);
        self.doc = Some(doc);
    }

    /// Sets the active group.
    pub fn set_group(&mut self, label: String, key: Value) {
        self.group = Some((label, key));
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("has_doc", &self.doc.is_some())
            .field("key", &self.key)
            .field("group", &self.group)
            .finish()
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `IS` (null-aware equality)
    Is,
    /// `IS NOT`
    IsNot,
    /// `IN`
    In,
    /// `NOT IN`
    NotIn,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
}

impl BinaryOperator {
    /// Returns true for `=, !=, >, >=, <, <=, IN`: the operators the
    /// planner can turn into range scans.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Gt
                | BinaryOperator::Gte
                | BinaryOperator::Lt
                | BinaryOperator::Lte
                | BinaryOperator::In
        )
    }

    fn arithmetic(self) -> Option<ArithmeticOp> {
        Some(match self {
            BinaryOperator::Add => ArithmeticOp::Add,
            BinaryOperator::Sub => ArithmeticOp::Sub,
            BinaryOperator::Mul => ArithmeticOp::Mul,
            BinaryOperator::Div => ArithmeticOp::Div,
            BinaryOperator::Mod => ArithmeticOp::Mod,
            BinaryOperator::BitAnd => ArithmeticOp::BitAnd,
            BinaryOperator::BitOr => ArithmeticOp::BitOr,
            BinaryOperator::BitXor => ArithmeticOp::BitXor,
            _ => return None,
        })
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Neq => "!=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Gte => ">=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Is => "IS",
            BinaryOperator::IsNot => "IS NOT",
            BinaryOperator::In => "IN",
            BinaryOperator::NotIn => "NOT IN",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
        };
        f.write_str(s)
    }
}

/// An expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A constant.
    Literal(Value),
    /// A document path, read from the current document.
    Path(Path),
    /// A positional parameter.
    Param(usize),
    /// The `*` wildcard. Only meaningful in projections and `COUNT(*)`.
    Wildcard,
    /// An expression list, as on the right side of `IN`.
    List(Vec<Expr>),
    /// A binary operation.
    Binary {
        /// Operator.
        op: BinaryOperator,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical negation by truthiness.
    Not(Box<Expr>),
    /// `CAST(expr AS type)`.
    Cast {
        /// The operand.
        expr: Box<Expr>,
        /// Target type.
        target: ValueType,
    },
    /// An aggregate function. Inside the pipeline it reads its own
    /// output field from the aggregated document.
    Aggregate(AggregateFunc),
}

impl Expr {
    /// Shorthand for a path expression over one field.
    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Path(Path::field(name))
    }

    /// Shorthand for an integer literal.
    pub fn integer(i: i64) -> Expr {
        Expr::Literal(Value::Integer(i))
    }

    /// Shorthand for a text literal.
    pub fn text(s: impl Into<String>) -> Expr {
        Expr::Literal(Value::text(s))
    }

    /// Builds a binary expression.
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluates the expression against an environment.
    pub fn eval(&self, env: &Environment) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => match env.document() {
                Some(doc) => match path.get_value_from_document(doc.as_ref()) {
                    Ok(v) => Ok(v),
                    // a missing field reads as NULL
                    Err(_) => Ok(Value::Null),
                },
                None => Ok(Value::Null),
            },
            Expr::Param(i) => env.params().get(*i).cloned().ok_or_else(|| {
                Error::InvalidArgument(format!("missing parameter ${}", i + 1))
            }),
            Expr::Wildcard => Err(Error::InvalidArgument(
                "wildcard outside projection".to_string(),
            )),
            Expr::List(items) => {
                let mut vb = ValueBuffer::new();
                for item in items {
                    vb.push(item.eval(env)?);
                }
                Ok(vb.into_value())
            }
            Expr::Binary { op, left, right } => eval_binary(*op, left, right, env),
            Expr::Not(inner) => {
                let v = inner.eval(env)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Bool(!v.is_truthy().map_err(Error::from)?))
            }
            Expr::Cast { expr, target } => {
                let v = expr.eval(env)?;
                // a failed cast inside a query reads as NULL
                Ok(cast_as(&v, *target).unwrap_or(Value::Null))
            }
            Expr::Aggregate(func) => match env.document() {
                Some(doc) => match doc.get_by_field(&func.to_string()) {
                    Ok(v) => Ok(v),
                    Err(_) => Ok(Value::Null),
                },
                None => Ok(Value::Null),
            },
        }
    }

    /// Evaluates the expression to a boolean suitable for a filter:
    /// NULL and non-truthy values read as false.
    pub fn eval_truthy(&self, env: &Environment) -> Result<bool> {
        let v = self.eval(env)?;
        if v.is_null() {
            return Ok(false);
        }
        Ok(v.is_truthy().map_err(Error::from)?)
    }
}

fn eval_binary(op: BinaryOperator, left: &Expr, right: &Expr, env: &Environment) -> Result<Value> {
    if let Some(arith) = op.arithmetic() {
        let l = left.eval(env)?;
        let r = right.eval(env)?;
        return Ok(l.arithmetic(arith, &r));
    }

    match op {
        BinaryOperator::And => {
            if !left.eval_truthy(env)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(right.eval_truthy(env)?))
        }
        BinaryOperator::Or => {
            if left.eval_truthy(env)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(right.eval_truthy(env)?))
        }
        BinaryOperator::Is => {
            let l = left.eval(env)?;
            let r = right.eval(env)?;
            Ok(Value::Bool(l == r))
        }
        BinaryOperator::IsNot => {
            let l = left.eval(env)?;
            let r = right.eval(env)?;
            Ok(Value::Bool(l != r))
        }
        BinaryOperator::In => eval_in(left, right, env),
        BinaryOperator::NotIn => match eval_in(left, right, env)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Ok(other),
        },
        BinaryOperator::Eq
        | BinaryOperator::Neq
        | BinaryOperator::Gt
        | BinaryOperator::Gte
        | BinaryOperator::Lt
        | BinaryOperator::Lte => {
            let l = left.eval(env)?;
            let r = right.eval(env)?;
            let ord = match l.sql_cmp(&r) {
                Some(ord) => ord,
                // comparing with NULL evaluates to NULL
                None => return Ok(Value::Null),
            };
            let result = match op {
                BinaryOperator::Eq => ord.is_eq(),
                BinaryOperator::Neq => ord.is_ne(),
                BinaryOperator::Gt => ord.is_gt(),
                BinaryOperator::Gte => ord.is_ge(),
                BinaryOperator::Lt => ord.is_lt(),
                BinaryOperator::Lte => ord.is_le(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        _ => unreachable!("arithmetic handled above"),
    }
}

fn eval_in(left: &Expr, right: &Expr, env: &Environment) -> Result<Value> {
    let needle = left.eval(env)?;
    let haystack = right.eval(env)?;

    if needle.is_null() || haystack.is_null() {
        return Ok(Value::Null);
    }
    let arr = match &haystack {
        Value::Array(a) => a,
        _ => return Ok(Value::Bool(false)),
    };
    for candidate in array_values(arr.as_ref()).map_err(Error::from)? {
        if candidate == needle {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::Param(i) => write!(f, "${}", i + 1),
            Expr::Wildcard => f.write_str("*"),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::Cast { expr, target } => write!(f, "CAST({expr} AS {target})"),
            Expr::Aggregate(func) => write!(f, "{func}"),
        }
    }
}

/// A projected expression with an optional alias. The output field name
/// is the alias when given, the expression text otherwise.
#[derive(Debug, Clone)]
pub struct ProjectedExpr {
    /// The projected expression.
    pub expr: Expr,
    /// Optional output name.
    pub alias: Option<String>,
}

impl ProjectedExpr {
    /// Projects an expression under its own text.
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// Projects an expression under an alias.
    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// The output field name.
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.to_string(),
        }
    }
}

/// Helper building an environment around one document.
pub fn doc_env(doc: FieldBuffer, params: &[Value]) -> Environment {
    let mut env = Environment::with_params(params);
    env.set_document(Arc::new(doc));
    env
}
