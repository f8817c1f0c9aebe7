//! Runtime values.
//!
//! `Value` is the tagged union flowing through every layer of the engine:
//! expression evaluation, constraints, index keys and query results.
//! Array and document variants hold capability-style handles so that both
//! in-memory buffers and lazily decoded rows share one representation.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::document::{array_values, document_fields, Array, Document};
use crate::error::Result;
use crate::types::ValueType;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The SQL NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// Ordered sequence of values.
    Array(Arc<dyn Array>),
    /// Ordered sequence of (field, value) pairs.
    Document(Arc<dyn Document>),
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Creates a blob value.
    pub fn blob(b: impl Into<Vec<u8>>) -> Self {
        Value::Blob(b.into())
    }

    /// Returns the type tag of the value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
            Value::Array(_) => ValueType::Array,
            Value::Document(_) => ValueType::Document,
        }
    }

    /// Returns true if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if the value is the zero value of its type.
    pub fn is_zero(&self) -> Result<bool> {
        Ok(match self {
            Value::Null => false,
            Value::Bool(b) => !*b,
            Value::Integer(i) => *i == 0,
            Value::Double(f) => *f == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Blob(b) => b.is_empty(),
            Value::Array(a) => {
                let mut empty = true;
                a.iterate(&mut |_, _| {
                    empty = false;
                    Ok(())
                })?;
                empty
            }
            Value::Document(d) => {
                let mut empty = true;
                d.iterate(&mut |_, _| {
                    empty = false;
                    Ok(())
                })?;
                empty
            }
        })
    }

    /// Returns true if the value is neither NULL nor the zero value of
    /// its type.
    pub fn is_truthy(&self) -> Result<bool> {
        if self.is_null() {
            return Ok(false);
        }
        Ok(!self.is_zero()?)
    }

    /// Returns the value as an f64 when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Total order over all values: NULL sorts lowest, numbers compare
    /// across Integer/Double, every other cross-type pair compares by
    /// type tag. This is the ordering used by ORDER BY, MIN and MAX.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let (lt, rt) = (self.value_type(), other.value_type());

        if lt.is_number() && rt.is_number() {
            if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
                return a.cmp(b);
            }
            let a = self.as_f64().unwrap_or_default();
            let b = other.as_f64().unwrap_or_default();
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }

        if lt != rt {
            return lt.cmp(&rt);
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => cmp_arrays(a.as_ref(), b.as_ref()),
            (Value::Document(a), Value::Document(b)) => cmp_documents(a.as_ref(), b.as_ref()),
            _ => Ordering::Equal,
        }
    }

    /// SQL comparison: returns None when either side is NULL, so that
    /// callers can propagate three-valued logic.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self.total_cmp(other))
    }
}

fn cmp_arrays(a: &dyn Array, b: &dyn Array) -> Ordering {
    let xs = array_values(a).unwrap_or_default();
    let ys = array_values(b).unwrap_or_default();
    for (x, y) in xs.iter().zip(ys.iter()) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    xs.len().cmp(&ys.len())
}

fn cmp_documents(a: &dyn Document, b: &dyn Document) -> Ordering {
    let xs = document_fields(a).unwrap_or_default();
    let ys = document_fields(b).unwrap_or_default();
    for ((xf, xv), (yf, yv)) in xs.iter().zip(ys.iter()) {
        let ord = xf.cmp(yf);
        if ord != Ordering::Equal {
            return ord;
        }
        let ord = xv.total_cmp(yv);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    xs.len().cmp(&ys.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.total_cmp(other) == Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            other => match crate::json::to_json_string(other) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "<{}>", other.value_type()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Arithmetic and bitwise operators over values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Bitwise AND.
    BitAnd,
    /// Bitwise OR.
    BitOr,
    /// Bitwise XOR.
    BitXor,
}

impl Value {
    /// Applies an arithmetic operator.
    ///
    /// NULL or Bool on either side yields NULL, as does any non-numeric
    /// operand. Integer overflow on `+ - *` promotes the result to Double
    /// instead of wrapping. Division or modulo by zero yields NULL.
    pub fn arithmetic(&self, op: ArithmeticOp, other: &Value) -> Value {
        let (lt, rt) = (self.value_type(), other.value_type());

        if lt == ValueType::Null || rt == ValueType::Null {
            return Value::Null;
        }
        if lt == ValueType::Bool || rt == ValueType::Bool {
            return Value::Null;
        }
        if !lt.is_number() || !rt.is_number() {
            return Value::Null;
        }

        if lt == ValueType::Double || rt == ValueType::Double {
            let a = self.as_f64().unwrap_or_default();
            let b = other.as_f64().unwrap_or_default();
            return float_arithmetic(a, op, b);
        }

        let (a, b) = match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => (*a, *b),
            _ => return Value::Null,
        };
        integer_arithmetic(a, op, b)
    }
}

fn integer_arithmetic(a: i64, op: ArithmeticOp, b: i64) -> Value {
    match op {
        ArithmeticOp::Add => match a.checked_add(b) {
            Some(r) => Value::Integer(r),
            None => Value::Double(a as f64 + b as f64),
        },
        ArithmeticOp::Sub => match a.checked_sub(b) {
            Some(r) => Value::Integer(r),
            None => Value::Double(a as f64 - b as f64),
        },
        ArithmeticOp::Mul => match a.checked_mul(b) {
            Some(r) => Value::Integer(r),
            None => Value::Double(a as f64 * b as f64),
        },
        ArithmeticOp::Div => {
            if b == 0 {
                return Value::Null;
            }
            match a.checked_div(b) {
                Some(r) => Value::Integer(r),
                None => Value::Double(a as f64 / b as f64),
            }
        }
        ArithmeticOp::Mod => {
            if b == 0 {
                return Value::Null;
            }
            Value::Integer(a.checked_rem(b).unwrap_or(0))
        }
        ArithmeticOp::BitAnd => Value::Integer(a & b),
        ArithmeticOp::BitOr => Value::Integer(a | b),
        ArithmeticOp::BitXor => Value::Integer(a ^ b),
    }
}

fn float_arithmetic(a: f64, op: ArithmeticOp, b: f64) -> Value {
    match op {
        ArithmeticOp::Add => Value::Double(a + b),
        ArithmeticOp::Sub => Value::Double(a - b),
        ArithmeticOp::Mul => Value::Double(a * b),
        ArithmeticOp::Div => {
            if b == 0.0 {
                Value::Null
            } else {
                Value::Double(a / b)
            }
        }
        ArithmeticOp::Mod => {
            let r = a % b;
            if r.is_nan() {
                Value::Null
            } else {
                Value::Double(r)
            }
        }
        // bitwise operators coerce both sides to integers
        ArithmeticOp::BitAnd => Value::Integer(a as i64 & b as i64),
        ArithmeticOp::BitOr => Value::Integer(a as i64 | b as i64),
        ArithmeticOp::BitXor => Value::Integer(a as i64 ^ b as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldBuffer, ValueBuffer};

    #[test]
    fn test_null_compares_equal_only_to_null() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Integer(0));
        assert!(Value::Integer(0).sql_cmp(&Value::Null).is_none());
    }

    #[test]
    fn test_cross_numeric_comparison() {
        assert_eq!(Value::Integer(10), Value::Double(10.0));
        assert_eq!(
            Value::Integer(10).total_cmp(&Value::Double(10.5)),
            Ordering::Less
        );
    }

    #[test]
    fn test_cross_type_order_follows_tags() {
        let ordered = vec![
            Value::Null,
            Value::Bool(false),
            Value::Integer(1),
            Value::Double(1.5),
            Value::text("a"),
            ValueBuffer::new().into_value(),
            FieldBuffer::new().into_value(),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].total_cmp(&pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy().unwrap());
        assert!(!Value::Integer(0).is_truthy().unwrap());
        assert!(!Value::Double(0.0).is_truthy().unwrap());
        assert!(!Value::text("").is_truthy().unwrap());
        assert!(!ValueBuffer::new().into_value().is_truthy().unwrap());
        assert!(!FieldBuffer::new().into_value().is_truthy().unwrap());

        assert!(Value::Integer(3).is_truthy().unwrap());
        assert!(Value::text("x").is_truthy().unwrap());
        let mut a = ValueBuffer::new();
        a.push(Value::Null);
        assert!(a.into_value().is_truthy().unwrap());
    }

    #[test]
    fn test_arithmetic_null_and_bool_propagation() {
        assert!(Value::Null
            .arithmetic(ArithmeticOp::Add, &Value::Integer(1))
            .is_null());
        assert!(Value::Bool(true)
            .arithmetic(ArithmeticOp::Add, &Value::Integer(1))
            .is_null());
        assert!(Value::text("a")
            .arithmetic(ArithmeticOp::Mul, &Value::Integer(2))
            .is_null());
    }

    #[test]
    fn test_integer_overflow_promotes_to_double() {
        let r = Value::Integer(i64::MAX).arithmetic(ArithmeticOp::Add, &Value::Integer(1));
        assert_eq!(r.value_type(), ValueType::Double);
        assert_eq!(r, Value::Double(9.223372036854776e18));

        let r = Value::Integer(i64::MIN).arithmetic(ArithmeticOp::Sub, &Value::Integer(1));
        assert_eq!(r.value_type(), ValueType::Double);

        let r = Value::Integer(i64::MAX).arithmetic(ArithmeticOp::Mul, &Value::Integer(2));
        assert_eq!(r.value_type(), ValueType::Double);
    }

    #[test]
    fn test_division_by_zero_yields_null() {
        assert!(Value::Integer(1)
            .arithmetic(ArithmeticOp::Div, &Value::Integer(0))
            .is_null());
        assert!(Value::Integer(1)
            .arithmetic(ArithmeticOp::Mod, &Value::Integer(0))
            .is_null());
        assert!(Value::Double(1.0)
            .arithmetic(ArithmeticOp::Div, &Value::Double(0.0))
            .is_null());
    }

    #[test]
    fn test_double_promotion() {
        let r = Value::Integer(1).arithmetic(ArithmeticOp::Add, &Value::Double(0.5));
        assert_eq!(r, Value::Double(1.5));
    }

    #[test]
    fn test_bitwise_coerces_doubles() {
        let r = Value::Double(6.9).arithmetic(ArithmeticOp::BitAnd, &Value::Integer(3));
        assert_eq!(r, Value::Integer(2));
    }
}
