use thiserror::Error;

use crate::mapping::MappingError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BinderError {
    #[error("expression does not denote a sequence: {expr}")]
    NotASequence { expr: String },

    #[error("{operator}: expected a lambda with at least {expected} parameter(s)")]
    LambdaArity {
        operator: &'static str,
        expected: usize,
    },

    #[error("{operator}: set operands project {left} and {right} columns")]
    SetOperandMismatch {
        operator: &'static str,
        left: usize,
        right: usize,
    },

    #[error("Batch: operation does not bind to a command: {expr}")]
    NotACommand { expr: String },

    #[error("MappingError: {0}")]
    Mapping(#[from] MappingError),
}

impl BinderError {
    pub(super) fn not_a_sequence(expr: &crate::query_compiler::relation_expr::Expr) -> Self {
        BinderError::NotASequence {
            expr: expr.to_string(),
        }
    }
}
