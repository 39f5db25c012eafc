//! # Rewriter Pipeline
//!
//! Fixed sequence of tree-to-tree passes run once over a bound tree:
//!
//! 1. aggregate re-attachment, then an early unused-column / subquery sweep
//! 2. ORDER BY hoisting
//! 3. relationship binding, entity comparison, singleton and client joins
//! 4. join normalization (cross join isolation, apply downgrade, redundant joins)
//! 5. redundant subquery removal, a second redundant join sweep over the
//!    flattened layers, then unused column and duplicate column removal
//! 6. dialect pagination, followed by a second ORDER BY hoist if it changed anything
//!
//! Every pass implements [`RewriterPass`]; a pass that changes the tree is
//! recorded on the [`CompileCtx`] trace.

use std::sync::Arc;

use log::{debug, info, log_enabled, trace, Level};

use super::compile_ctx::CompileCtx;
use super::language::PaginationStrategy;
use super::relation_expr::Expr;

pub mod errors;
pub mod rewriter_pass;

mod aggregate_rewriter;
mod client_join;
mod cross_apply_rewriter;
mod cross_join_isolator;
mod entity_comparison;
mod order_by_rewriter;
mod redundant_column_remover;
mod redundant_join_remover;
mod redundant_subquery_remover;
mod relationship_binder;
mod singleton_projection;
mod skip_take_to_top;
mod skip_to_row_number;
mod unused_column_remover;

pub use aggregate_rewriter::AggregateRewriter;
pub use client_join::ClientJoinRewriter;
pub use cross_apply_rewriter::CrossApplyRewriter;
pub use cross_join_isolator::CrossJoinIsolator;
pub use entity_comparison::EntityComparisonRewriter;
pub use errors::{Pass, RewriterError};
pub use order_by_rewriter::OrderByRewriter;
pub use redundant_column_remover::RedundantColumnRemover;
pub use redundant_join_remover::RedundantJoinRemover;
pub use redundant_subquery_remover::RedundantSubqueryRemover;
pub use relationship_binder::RelationshipBinder;
pub use rewriter_pass::{RewriterPass, RewriterResult};
pub use singleton_projection::SingletonProjectionRewriter;
pub use skip_take_to_top::SkipTakeToTopRewriter;
pub use skip_to_row_number::SkipToRowNumberRewriter;
pub use unused_column_remover::UnusedColumnRemover;

pub struct RewriterPipeline;

impl RewriterPipeline {
    pub fn run(expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Arc<Expr>> {
        let expr = apply(&AggregateRewriter, expr, ctx)?;
        let expr = apply(&UnusedColumnRemover, expr, ctx)?;
        let expr = apply(&RedundantSubqueryRemover, expr, ctx)?;
        let expr = apply(&OrderByRewriter, expr, ctx)?;

        let expr = apply(&RelationshipBinder, expr, ctx)?;
        let expr = apply(&EntityComparisonRewriter, expr, ctx)?;
        let expr = apply(&SingletonProjectionRewriter, expr, ctx)?;
        let expr = apply(&ClientJoinRewriter, expr, ctx)?;
        let expr = apply(&CrossJoinIsolator, expr, ctx)?;
        let expr = apply(&CrossApplyRewriter, expr, ctx)?;
        let expr = apply(&RedundantJoinRemover, expr, ctx)?;
        let expr = apply(&RedundantSubqueryRemover, expr, ctx)?;
        // applies from separate singleton accesses only share a join tree once flattened
        let expr = apply(&RedundantJoinRemover, expr, ctx)?;
        let expr = apply(&UnusedColumnRemover, expr, ctx)?;
        let expr = apply(&RedundantColumnRemover, expr, ctx)?;

        let paginated = match ctx.language().pagination() {
            PaginationStrategy::NestedTop => Some(SkipTakeToTopRewriter.rewrite(expr.clone(), ctx)?),
            PaginationStrategy::RowNumber => Some(SkipToRowNumberRewriter.rewrite(expr.clone(), ctx)?),
            PaginationStrategy::OffsetFetch => None,
        };
        let expr = match paginated {
            Some(transformed) if transformed.is_yes() => {
                let pass = match ctx.language().pagination() {
                    PaginationStrategy::NestedTop => Pass::SkipTakeToTop,
                    _ => Pass::SkipToRowNumber,
                };
                ctx.record_transformed(pass);
                debug!("{}: transformed", pass);
                apply(&OrderByRewriter, transformed.get_plan(), ctx)?
            }
            _ => expr,
        };

        info!(
            "RewriterPipeline: {} pass(es) changed the tree: [{}]",
            ctx.transformed_passes().len(),
            ctx.transformed_passes()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(expr)
    }
}

fn apply(pass: &dyn RewriterPass, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Arc<Expr>> {
    let transformed = pass.rewrite(expr, ctx)?;
    if transformed.is_yes() {
        ctx.record_transformed(pass.pass());
        debug!("{}: transformed", pass.pass());
    }
    let expr = transformed.get_plan();
    if log_enabled!(Level::Trace) {
        trace!("{} ->\n{}", pass.pass(), expr);
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::language::{DialectCapabilities, ProjectionAffinity};
    use crate::query_compiler::operator::builder::{new_object, Query};
    use crate::query_compiler::relation_expr::visitors::{walk_expr_ref, ExprVisitor};
    use crate::query_compiler::relation_expr::Expr;
    use crate::query_compiler::test_support::{ctx, ctx_with};

    fn run(query: Expr, mut ctx: CompileCtx) -> (Expr, Vec<Pass>) {
        let bound = bind(&query, &ctx).unwrap();
        let out = RewriterPipeline::run(Arc::new(bound), &mut ctx).unwrap();
        (Arc::unwrap_or_clone(out), ctx.transformed_passes().to_vec())
    }

    #[test]
    fn test_consecutive_layers_collapse() {
        let query = Query::table("Customers")
            .filter(|c| c.member("City").eq(Expr::constant("London")))
            .into_expr();
        let (out, passes) = run(query, ctx());
        let Expr::Projection(p) = out else { panic!() };
        assert!(matches!(p.select.from.as_deref(), Some(Expr::Table(_))));
        assert!(p.select.where_clause.is_some());
        assert!(passes.contains(&Pass::RedundantSubqueryRemover));
    }

    #[derive(Default)]
    struct JoinCounter {
        joins: usize,
    }

    impl ExprVisitor for JoinCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if matches!(expr, Expr::Join(_)) {
                self.joins += 1;
            }
            walk_expr_ref(self, expr)
        }
    }

    #[test]
    fn test_repeated_singleton_access_shares_one_join() {
        let query = Query::table("Orders")
            .select(|o| {
                new_object([
                    ("OrderID", o.clone().member("OrderID")),
                    ("A", o.clone().member("Customer").member("City")),
                    ("B", o.member("Customer").member("CompanyName")),
                ])
            })
            .into_expr();
        let (out, passes) = run(query, ctx());
        let mut counter = JoinCounter::default();
        counter.visit_expr(&out);
        assert_eq!(counter.joins, 1, "expected a single join: {}", out);
        assert!(passes.contains(&Pass::RedundantJoinRemover));
    }

    #[test]
    fn test_row_number_paging_is_dialect_selected() {
        let query = Query::table("Customers")
            .order_by(|c| c.member("CustomerID"))
            .skip(5)
            .take(10)
            .into_expr();
        let (_, passes) = run(query, ctx_with(DialectCapabilities::tsql(), ProjectionAffinity::Client));
        assert!(passes.contains(&Pass::SkipToRowNumber));
        assert!(!passes.contains(&Pass::SkipTakeToTop));
    }

    #[test]
    fn test_offset_fetch_keeps_skip_and_take() {
        let query = Query::table("Customers")
            .order_by(|c| c.member("CustomerID"))
            .skip(5)
            .take(10)
            .into_expr();
        let (out, passes) = run(query, ctx());
        assert!(!passes.contains(&Pass::SkipToRowNumber));
        let Expr::Projection(p) = out else { panic!() };
        assert!(p.select.skip.is_some() && p.select.take.is_some());
    }
}
