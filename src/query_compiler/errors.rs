use thiserror::Error;

use super::binder::errors::BinderError;
use super::rewriter::errors::RewriterError;
use crate::mapping::MappingError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("BinderError: {0}")]
    Binder(#[from] BinderError),

    #[error("RewriterError: {0}")]
    Rewriter(#[from] RewriterError),

    #[error("MappingError: {0}")]
    Mapping(#[from] MappingError),
}
