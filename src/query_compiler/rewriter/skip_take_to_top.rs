//! SKIP/TAKE through nested TOP for dialects that only have TOP.
//!
//! `ORDER BY k SKIP s TAKE t` becomes three layers: the first `s + t` rows by
//! `k`, the last `t` of those (TOP `t` by `k` inverted), re-sorted by `k`.
//! Only selects with an ordering, a skip and a take are rewritten.

use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use super::order_by_rewriter::hoist_orderings;
use super::skip_to_row_number::add_folded;
use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{infallible, walk_select, ExprRewriter};
use crate::query_compiler::relation_expr::{Expr, OrderExpr, SelectExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct SkipTakeToTopRewriter;

impl RewriterPass for SkipTakeToTopRewriter {
    fn pass(&self) -> Pass {
        Pass::SkipTakeToTop
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let output = infallible(TopPager.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

fn inverted(orderings: &[OrderExpr]) -> Vec<OrderExpr> {
    orderings
        .iter()
        .map(|o| OrderExpr::new(o.order_type.inverted(), o.expression.clone()))
        .collect()
}

struct TopPager;

impl ExprRewriter for TopPager {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let select = walk_select(self, select)?;
        let (Some(skip), Some(take)) = (select.skip.as_deref(), select.take.as_deref()) else {
            return Ok(select);
        };
        if select.order_by.is_empty() {
            return Ok(select);
        }
        let take = take.clone();
        let first_rows = add_folded(skip, &take);

        let paged = select.clone().with_take(Some(first_rows)).with_skip(None);
        let last_rows = paged.add_redundant_select(TableAlias::new()).with_take(Some(take));
        let last_rows = hoist_orderings(&last_rows);
        let order_by = inverted(&last_rows.order_by);
        let last_rows = last_rows.with_order_by(order_by);

        let resorted = last_rows
            .add_redundant_select(TableAlias::new())
            .with_take(Some(Expr::constant(0)));
        let resorted = hoist_orderings(&resorted);
        let order_by = inverted(&resorted.order_by);
        trace!("SkipTakeToTop: {} paged with nested TOP", select.alias);
        Ok(resorted.with_order_by(order_by).with_take(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::language::{DialectCapabilities, ProjectionAffinity};
    use crate::query_compiler::operator::builder::Query;
    use crate::query_compiler::relation_expr::OrderType;
    use crate::query_compiler::rewriter::RedundantSubqueryRemover;
    use crate::query_compiler::test_support::ctx_with;

    fn inner(select: &SelectExpr) -> &SelectExpr {
        select.from.as_deref().and_then(Expr::as_select).expect("select source")
    }

    #[test]
    fn test_skip_take_becomes_nested_top() {
        let mut ctx = ctx_with(DialectCapabilities::access(), ProjectionAffinity::Client);
        let query = Query::table("Customers")
            .order_by(|c| c.member("CustomerID"))
            .skip(5)
            .take(10)
            .into_expr();
        let bound = bind(&query, &ctx).unwrap();
        let merged = RedundantSubqueryRemover.rewrite(Arc::new(bound), &mut ctx).unwrap().get_plan();
        let out = SkipTakeToTopRewriter.rewrite(merged, &mut ctx).unwrap();
        assert!(out.is_yes());
        let Expr::Projection(p) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };

        let outer = &p.select;
        assert!(outer.take.is_none() && outer.skip.is_none());
        assert_eq!(outer.order_by.len(), 1);
        assert_eq!(outer.order_by[0].order_type, OrderType::Ascending);

        let last = inner(outer);
        assert_eq!(last.take.as_deref(), Some(&Expr::constant(10)));
        assert_eq!(last.order_by[0].order_type, OrderType::Descending);

        let first = inner(last);
        assert_eq!(first.take.as_deref(), Some(&Expr::constant(15)));
        assert!(first.skip.is_none());
        assert_eq!(first.order_by[0].order_type, OrderType::Ascending);
    }

    #[test]
    fn test_take_alone_is_left_as_top() {
        let mut ctx = ctx_with(DialectCapabilities::access(), ProjectionAffinity::Client);
        let query = Query::table("Customers").order_by(|c| c.member("City")).take(3).into_expr();
        let bound = bind(&query, &ctx).unwrap();
        let out = SkipTakeToTopRewriter.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }
}
