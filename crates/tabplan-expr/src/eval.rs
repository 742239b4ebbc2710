use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{ExprError, ExprResult};
use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::Value;

/// A row that expressions can be evaluated against.
pub trait Row {
    /// Look a column up in the row's current schema.
    fn get(&self, column: &str) -> Option<&Value>;
}

impl Row for HashMap<String, Value> {
    fn get(&self, column: &str) -> Option<&Value> {
        HashMap::get(self, column)
    }
}

impl Row for [(&str, Value)] {
    fn get(&self, column: &str) -> Option<&Value> {
        self.iter()
            .find_map(|(name, value)| (*name == column).then_some(value))
    }
}

impl<const N: usize> Row for [(&str, Value); N] {
    fn get(&self, column: &str) -> Option<&Value> {
        Row::get(self.as_slice(), column)
    }
}

/// Evaluate `expr` against `row`.
///
/// Evaluation never mutates the row. `and` / `or` short-circuit, so an operand that
/// would fail is not evaluated once the result is decided.
pub fn evaluate<R: Row + ?Sized>(expr: &Expr, row: &R) -> ExprResult<Value> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Float(v) => Ok(Value::Float(*v)),
        Expr::Text(s) => Ok(Value::from(s.as_str())),
        Expr::Boolean(b) => Ok(Value::Boolean(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Column(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::ColumnNotFound(name.clone())),
        Expr::UnaryOp { op, expr } => eval_unary(*op, evaluate(expr, row)?),
        Expr::BinaryOp {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
        } => eval_logical(*op, left, right, row),
        Expr::BinaryOp { op, left, right } => {
            let left = evaluate(left, row)?;
            let right = evaluate(right, row)?;
            eval_binary(*op, left, right)
        }
    }
}

/// Evaluate a predicate: only `true` keeps a row, `null` counts as not matching.
pub fn evaluate_predicate<R: Row + ?Sized>(expr: &Expr, row: &R) -> ExprResult<bool> {
    match evaluate(expr, row)? {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(ExprError::TypeMismatch {
            op: "filter",
            left: other.type_name(),
            right: "boolean",
        }),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> ExprResult<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Negate, Value::Int(v)) => v
            .checked_neg()
            .map(Value::Int)
            .ok_or(ExprError::Overflow { op: "-" }),
        (UnaryOp::Negate, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Negate, other) => Err(ExprError::TypeMismatch {
            op: "-",
            left: other.type_name(),
            right: "number",
        }),
        (UnaryOp::Not, other) => Err(ExprError::TypeMismatch {
            op: "not",
            left: other.type_name(),
            right: "boolean",
        }),
    }
}

/// Three-valued `and` / `or`.
fn eval_logical<R: Row + ?Sized>(op: BinaryOp, left: &Expr, right: &Expr, row: &R) -> ExprResult<Value> {
    let symbol = op.symbol();
    let as_bool = |value: Value| -> ExprResult<Option<bool>> {
        match value {
            Value::Boolean(b) => Ok(Some(b)),
            Value::Null => Ok(None),
            other => Err(ExprError::TypeMismatch {
                op: symbol,
                left: other.type_name(),
                right: "boolean",
            }),
        }
    };

    // `false and _` / `true or _` decide the result without the right operand.
    let decisive = op == BinaryOp::Or;
    let l = as_bool(evaluate(left, row)?)?;
    if l == Some(decisive) {
        return Ok(Value::Boolean(decisive));
    }
    let r = as_bool(evaluate(right, row)?)?;
    Ok(match (l, r) {
        (_, Some(b)) if b == decisive => Value::Boolean(decisive),
        (Some(_), Some(_)) => Value::Boolean(!decisive),
        _ => Value::Null,
    })
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> ExprResult<Value> {
    match op {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Remainder => eval_arithmetic(op, left, right),
        BinaryOp::Equals | BinaryOp::NotEquals => {
            let equal = match (&left, &right) {
                (Value::Null, Value::Null) => true,
                (Value::Null, _) | (_, Value::Null) => false,
                _ => compare_values(op, &left, &right)? == Some(Ordering::Equal),
            };
            Ok(Value::Boolean(equal == (op == BinaryOp::Equals)))
        }
        BinaryOp::Less | BinaryOp::LessEquals | BinaryOp::Greater | BinaryOp::GreaterEquals => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let result = match compare_values(op, &left, &right)? {
                // NaN compares as neither smaller nor larger.
                None => false,
                Some(cmp) => match op {
                    BinaryOp::Less => cmp == Ordering::Less,
                    BinaryOp::LessEquals => cmp != Ordering::Greater,
                    BinaryOp::Greater => cmp == Ordering::Greater,
                    BinaryOp::GreaterEquals => cmp != Ordering::Less,
                    _ => unreachable!("unexpected comparison operator {op:?}"),
                },
            };
            Ok(Value::Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are evaluated lazily"),
    }
}

fn compare_values(op: BinaryOp, left: &Value, right: &Value) -> ExprResult<Option<Ordering>> {
    let cmp = match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                unreachable!("numeric values always widen to f64");
            };
            l.partial_cmp(&r)
        }
        (Value::String(l), Value::String(r)) => Some(l.as_ref().cmp(r.as_ref())),
        (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
        (Value::DateTime(l), Value::DateTime(r)) => Some(l.cmp(r)),
        _ => return Err(ExprError::mismatch(op.symbol(), left, right)),
    };
    Ok(cmp)
}

fn eval_arithmetic(op: BinaryOp, left: Value, right: Value) -> ExprResult<Value> {
    let symbol = op.symbol();
    match (&left, &right) {
        (Value::Null, Value::Null | Value::Int(_) | Value::Float(_))
        | (Value::Int(_) | Value::Float(_), Value::Null) => Ok(Value::Null),
        (Value::Int(l), Value::Int(r)) if op != BinaryOp::Divide => {
            let (l, r) = (*l, *r);
            let out = match op {
                BinaryOp::Add => l.checked_add(r),
                BinaryOp::Subtract => l.checked_sub(r),
                BinaryOp::Multiply => l.checked_mul(r),
                BinaryOp::Remainder => {
                    if r == 0 {
                        return Err(ExprError::DivideByZero);
                    }
                    l.checked_rem(r)
                }
                _ => unreachable!("unexpected arithmetic operator {op:?}"),
            };
            out.map(Value::Int).ok_or(ExprError::Overflow { op: symbol })
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                unreachable!("numeric values always widen to f64");
            };
            let out = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide | BinaryOp::Remainder => {
                    if r == 0.0 {
                        return Err(ExprError::DivideByZero);
                    }
                    if op == BinaryOp::Divide {
                        l / r
                    } else {
                        l % r
                    }
                }
                _ => unreachable!("unexpected arithmetic operator {op:?}"),
            };
            Ok(Value::Float(out))
        }
        _ => Err(ExprError::mismatch(symbol, &left, &right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn eval(input: &str) -> ExprResult<Value> {
        let row = [("a", Value::Int(3)), ("f", Value::Float(1.5)), ("s", Value::from("x"))];
        evaluate(&parse(input).expect("parse"), &row)
    }

    #[test]
    fn integer_arithmetic_stays_integral_except_division() {
        assert_eq!(eval("a * 2 + 1"), Ok(Value::Int(7)));
        assert_eq!(eval("a % 2"), Ok(Value::Int(1)));
        assert_eq!(eval("a / 2"), Ok(Value::Float(1.5)));
        assert_eq!(eval("a + f"), Ok(Value::Float(4.5)));
    }

    #[test]
    fn arithmetic_errors_are_reported() {
        assert_eq!(eval("a / 0"), Err(ExprError::DivideByZero));
        assert_eq!(eval("a % 0"), Err(ExprError::DivideByZero));
        assert_eq!(
            eval("9223372036854775807 + a"),
            Err(ExprError::Overflow { op: "+" })
        );
    }

    #[test]
    fn null_propagates_through_ordering_but_not_equality() {
        assert_eq!(eval("null > 1"), Ok(Value::Null));
        assert_eq!(eval("null == null"), Ok(Value::Boolean(true)));
        assert_eq!(eval("a != null"), Ok(Value::Boolean(true)));
        assert_eq!(eval("null + 1"), Ok(Value::Null));
    }

    #[test]
    fn kleene_logic() {
        assert_eq!(eval("null and false"), Ok(Value::Boolean(false)));
        assert_eq!(eval("null and true"), Ok(Value::Null));
        assert_eq!(eval("null or true"), Ok(Value::Boolean(true)));
        assert_eq!(eval("not null"), Ok(Value::Null));
    }
}
