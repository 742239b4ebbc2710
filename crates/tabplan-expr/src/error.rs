pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("type mismatch: cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },
}

impl ExprError {
    pub(crate) fn mismatch(op: &'static str, left: &crate::Value, right: &crate::Value) -> Self {
        ExprError::TypeMismatch {
            op,
            left: left.type_name(),
            right: right.type_name(),
        }
    }
}
