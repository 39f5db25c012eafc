//! # Query Compiler
//!
//! Turns a declarative operator tree into a normalized relation tree plus the
//! client projector that rebuilds results from its rows.
//!
//! ```text
//! QueryOp tree ──bind──▶ Projection(Select …) ──rewriter pipeline──▶ compiled tree
//! ```
//!
//! - [`binder`] lowers operators into selects, joins and projections
//! - [`rewriter`] runs the fixed sequence of normalizing passes
//! - [`evaluator`] executes compiled trees against in-memory tables

use std::sync::Arc;

use log::debug;

pub mod alias;
pub mod binder;
pub mod compile_ctx;
pub mod duplicator;
pub mod errors;
pub mod evaluator;
pub mod function_registry;
pub mod language;
pub mod operator;
pub mod projector;
pub mod relation_expr;
pub mod rewriter;
pub mod transformed;

#[cfg(test)]
pub(crate) mod test_support;

use compile_ctx::CompileCtx;
use errors::CompileError;
use relation_expr::Expr;

/// Binds `op` and runs the rewriter pipeline. The result is a
/// [`Expr::Projection`] for queries and an [`Expr::Command`] for mutations.
pub fn compile(op: &Expr, ctx: &mut CompileCtx) -> Result<Expr, CompileError> {
    ctx.reset_trace();
    let bound = binder::bind(op, ctx)?;
    let compiled = rewriter::RewriterPipeline::run(Arc::new(bound), ctx)?;
    debug!("compile: {}", compiled);
    Ok(Arc::unwrap_or_clone(compiled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::operator::builder::Query;
    use crate::query_compiler::test_support::ctx;

    #[test]
    fn test_compile_returns_projection_for_queries() {
        let mut ctx = ctx();
        let query = Query::table("Customers")
            .filter(|c| c.member("City").eq(Expr::constant("London")))
            .into_expr();
        let compiled = compile(&query, &mut ctx).unwrap();
        assert!(matches!(compiled, Expr::Projection(_)));
    }

    #[test]
    fn test_compile_surfaces_binder_errors() {
        let mut ctx = ctx();
        let query = Query::table("Nowhere").into_expr();
        assert!(matches!(compile(&query, &mut ctx), Err(CompileError::Binder(_))));
    }
}
