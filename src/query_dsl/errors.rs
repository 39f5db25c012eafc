use nom::error::{ContextError, ParseError};
use std::fmt;
use thiserror::Error;

/// nom error carrying the inputs and contexts of a failed parse, innermost
/// first.
#[derive(Debug, PartialEq)]
pub struct DslParsingError<'a> {
    pub errors: Vec<(&'a str, &'static str)>,
}

impl<'a> DslParsingError<'a> {
    pub fn new(input: &'a str, message: &'static str) -> Self {
        DslParsingError {
            errors: vec![(input, message)],
        }
    }
}

impl<'a> ParseError<&'a str> for DslParsingError<'a> {
    fn from_error_kind(input: &'a str, _kind: nom::error::ErrorKind) -> Self {
        DslParsingError {
            errors: vec![(input, "unexpected input")],
        }
    }

    fn append(_input: &'a str, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ContextError<&'a str> for DslParsingError<'a> {
    fn add_context(input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ctx));
        other
    }
}

impl fmt::Display for DslParsingError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (input, ctx) in &self.errors {
            writeln!(f, "{}: {}", ctx, input)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DslError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("unknown operator or function `{0}`")]
    UnknownOperator(String),

    #[error("{operator} takes {expected} argument(s), found {found}")]
    Arity {
        operator: String,
        expected: &'static str,
        found: usize,
    },

    #[error("{operator} expects a lambda with {expected} parameter(s)")]
    ExpectedLambda { operator: String, expected: usize },

    #[error("lambda outside of an operator argument")]
    UnexpectedLambda,

    #[error("cannot infer a member name in `new {{ }}`")]
    AnonymousMember,

    #[error("list literals may only hold constants")]
    NonConstantList,
}

impl DslError {
    /// Converts a nom failure over `source` into an offset-carrying error.
    pub(crate) fn from_parse(source: &str, error: DslParsingError<'_>) -> Self {
        let (input, _) = error.errors.first().copied().unwrap_or((source, ""));
        let message = error
            .errors
            .iter()
            .rev()
            .map(|(_, ctx)| *ctx)
            .filter(|ctx| !ctx.is_empty())
            .collect::<Vec<_>>()
            .join(" > ");
        DslError::Parse {
            offset: source.len().saturating_sub(input.len()),
            message,
        }
    }
}
