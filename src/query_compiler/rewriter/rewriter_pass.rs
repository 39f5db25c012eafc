//! Rewriter pass trait and result types.
//!
//! Every pass of the pipeline implements [`RewriterPass`]: a total function
//! from a bound tree to a new tree, reporting whether anything changed.
//!
//! # Implementing a Pass
//!
//! ```ignore
//! impl RewriterPass for MyPass {
//!     fn pass(&self) -> Pass { Pass::MyPass }
//!     fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx)
//!         -> RewriterResult<Transformed<Arc<Expr>>> {
//!         // Transform the tree here
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::query_compiler::{
    compile_ctx::CompileCtx,
    relation_expr::Expr,
    rewriter::errors::{Pass, RewriterError},
    transformed::Transformed,
};

pub type RewriterResult<T> = Result<T, RewriterError>;

pub trait RewriterPass {
    fn pass(&self) -> Pass;

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>>;
}

/// Wraps the output of an infallible tree rewrite, comparing with the input
/// to decide whether the pass changed anything.
pub fn transformed_if_changed(input: Arc<Expr>, output: Expr) -> Transformed<Arc<Expr>> {
    if *input == output {
        Transformed::No(input)
    } else {
        Transformed::Yes(Arc::new(output))
    }
}
