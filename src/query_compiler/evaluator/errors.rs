use thiserror::Error;

use crate::query_compiler::alias::TableAlias;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("table `{0}` is not in the fixture")]
    UnknownTable(String),

    #[error("alias {0} is not bound in the current scope")]
    DanglingAlias(TableAlias),

    #[error("column `{column}` not found on {alias}")]
    UnknownColumn { alias: TableAlias, column: String },

    #[error("type mismatch: {op} over {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[error("sequence contains no elements")]
    NoElements,

    #[error("sequence contains more than one element")]
    MoreThanOneElement,

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("scalar subquery returned {0} rows")]
    ScalarSubqueryRows(usize),

    #[error("aggregate outside of a grouped select")]
    AggregateOutsideGroup,

    #[error("ROW_NUMBER() outside of a numbered select")]
    RowNumberOutsideSelect,

    #[error("unknown function `{0}` with {1} argument(s)")]
    UnknownFunction(String, usize),

    #[error("{0} cannot be evaluated")]
    Unsupported(String),

    #[error("fixture: {0}")]
    Fixture(String),
}

impl EvalError {
    pub(crate) fn mismatch(op: impl std::fmt::Display, left: &impl std::fmt::Debug, right: &impl std::fmt::Debug) -> Self {
        EvalError::TypeMismatch {
            op: op.to_string(),
            left: format!("{:?}", left),
            right: format!("{:?}", right),
        }
    }
}
