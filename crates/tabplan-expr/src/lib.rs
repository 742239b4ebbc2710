//! Row predicate language for tabplan.
//!
//! This crate provides:
//! - Typed cell [`Value`]s and logical [`ColumnType`]s shared by readers and the engine.
//! - A small expression grammar (comparisons, arithmetic, `and`/`or`/`not`) with a
//!   canonical printer whose output parses back to the same tree.
//! - A pure, short-circuiting evaluator over any [`Row`].

#![forbid(unsafe_code)]

mod display;
mod error;
mod eval;
mod parser;
mod value;

pub use crate::error::{ExprError, ExprResult};
pub use crate::eval::{evaluate, evaluate_predicate, Row};
pub use crate::parser::{parse, BinaryOp, Expr, UnaryOp};
pub use crate::value::{ColumnType, Value, DATETIME_DISPLAY_FORMAT};
