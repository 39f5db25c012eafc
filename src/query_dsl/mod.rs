//! # Query DSL
//!
//! A LINQ-style method-chain surface for writing operator trees as text:
//!
//! ```text
//! Customers.Where(c => c.City == "London").OrderBy(c => c.CompanyName).Take(10)
//! ```
//!
//! Parsing produces a borrowed [`ast::Expression`]; [`lower`](lower::lower)
//! turns it into a [`QueryOp`](crate::query_compiler::operator::QueryOp)
//! tree ready for [`compile`](crate::query_compiler::compile).

use log::debug;

use crate::query_compiler::relation_expr::Expr;

pub mod ast;
mod common;
pub mod errors;
mod expression;
pub mod lower;

use ast::Expression;
use errors::DslError;

/// Parses `input` as one expression. Trailing input is an error.
pub fn parse(input: &str) -> Result<Expression<'_>, DslError> {
    match expression::parse_expression(input) {
        Ok((rest, expression)) if rest.trim().is_empty() => Ok(expression),
        Ok((rest, _)) => Err(DslError::Parse {
            offset: input.len() - rest.len(),
            message: "unexpected trailing input".to_string(),
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(DslError::from_parse(input, e)),
        Err(nom::Err::Incomplete(_)) => Err(DslError::Parse {
            offset: input.len(),
            message: "incomplete input".to_string(),
        }),
    }
}

/// Parses and lowers `input` into an operator tree.
pub fn parse_query(input: &str) -> Result<Expr, DslError> {
    let expression = parse(input)?;
    debug!("parsed query: {:?}", expression);
    lower::lower(&expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::operator::QueryOp;

    #[test]
    fn test_parse_query_produces_operator_tree() {
        let expr = parse_query(r#"Customers.Where(c => c.City == "London")"#).unwrap();
        let Expr::Operator(op) = expr else { panic!() };
        assert_eq!(op.name(), "Where");
    }

    #[test]
    fn test_trailing_input_reports_offset() {
        let err = parse("Customers.Take(1) )").unwrap_err();
        assert_eq!(
            err,
            DslError::Parse {
                offset: 18,
                message: "unexpected trailing input".to_string()
            }
        );
    }

    #[test]
    fn test_parse_failure_reports_offset() {
        let Err(DslError::Parse { offset, .. }) = parse("Customers.Where(c => c.City") else {
            panic!()
        };
        assert_eq!(offset, 27);
    }

    #[test]
    fn test_unknown_root_becomes_table() {
        let Expr::Operator(op) = parse_query("Orders").unwrap() else { panic!() };
        assert_eq!(*op, QueryOp::Table { entity: "Orders".to_string() });
    }
}
