//! Canonical text form of an [`Expr`].
//!
//! The printer only emits parentheses where the parser needs them, so
//! `parse(&expr.to_string())` reproduces `expr` exactly. Artifacts store filters in
//! this form, which keeps their serialization independent of how the predicate was
//! originally spelled.

use std::fmt::{self, Write as _};

use crate::parser::{is_bare_identifier, BinaryOp, Expr, UnaryOp, NOT_OPERAND_PREC};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Float(v) => write_float(f, *v),
            Expr::Text(s) => {
                f.write_char('"')?;
                f.write_str(&s.replace('"', "\"\""))?;
                f.write_char('"')
            }
            Expr::Boolean(true) => f.write_str("true"),
            Expr::Boolean(false) => f.write_str("false"),
            Expr::Null => f.write_str("null"),
            Expr::Column(name) => write_column(f, name),
            Expr::UnaryOp {
                op: UnaryOp::Negate,
                expr,
            } => {
                f.write_char('-')?;
                match expr.as_ref() {
                    Expr::BinaryOp { .. }
                    | Expr::UnaryOp {
                        op: UnaryOp::Not, ..
                    } => write!(f, "({expr})"),
                    _ => write!(f, "{expr}"),
                }
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                expr,
            } => {
                f.write_str("not ")?;
                match expr.as_ref() {
                    Expr::BinaryOp { op, .. } if op.precedence() < NOT_OPERAND_PREC => {
                        write!(f, "({expr})")
                    }
                    _ => write!(f, "{expr}"),
                }
            }
            Expr::BinaryOp { op, left, right } => {
                write_operand(f, *op, left, false)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, *op, right, true)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, parent: BinaryOp, child: &Expr, is_right: bool) -> fmt::Result {
    let prec = parent.precedence();
    let needs_parens = match child {
        // Operators are left-associative, so an equal-precedence right operand needs parens.
        Expr::BinaryOp { op, .. } => {
            op.precedence() < prec || (is_right && op.precedence() == prec)
        }
        // A bare `not` would swallow the rest of a comparison or arithmetic expression.
        Expr::UnaryOp {
            op: UnaryOp::Not, ..
        } => prec >= NOT_OPERAND_PREC,
        _ => false,
    };
    if needs_parens {
        write!(f, "({child})")
    } else {
        write!(f, "{child}")
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    // Integral floats keep a `.0` suffix so they lex as floats again.
    if v.is_finite() && v.fract() == 0.0 {
        write!(f, "{v:.1}")
    } else {
        write!(f, "{v}")
    }
}

fn write_column(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_bare_identifier(name) {
        f.write_str(name)
    } else {
        f.write_char('[')?;
        f.write_str(&name.replace(']', "]]"))?;
        f.write_char(']')
    }
}
