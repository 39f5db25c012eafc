//! Expands association members left in the tree by the binder.
//!
//! `o.Customer` inside a select's clauses becomes an OUTER APPLY of the
//! associated rows onto the select's FROM, with the access replaced by the
//! outer-joined projector. Collection associations, and singletons reached
//! from a projector, become nested projections correlated on the keys.

use std::sync::Arc;

use log::trace;

use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::members::bind_member;
use crate::query_compiler::relation_expr::visitors::{
    rewrite_columns, rewrite_order_by, walk_expr, ExprRewriter,
};
use crate::query_compiler::relation_expr::{Expr, JoinExpr, JoinKind, SelectExpr};
use crate::query_compiler::rewriter::errors::{Pass, RewriterError};
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct RelationshipBinder;

impl RewriterPass for RelationshipBinder {
    fn pass(&self) -> Pass {
        Pass::RelationshipBinder
    }

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut binder = AssociationExpander {
            ctx: &*ctx,
            current_from: None,
        };
        let output = binder.rewrite_expr(&expr)?;
        Ok(transformed_if_changed(expr, output))
    }
}

struct AssociationExpander<'a> {
    ctx: &'a CompileCtx,
    /// FROM of the select whose clauses are being visited.
    current_from: Option<Expr>,
}

impl AssociationExpander<'_> {
    fn mapping_error(source: crate::mapping::MappingError) -> RewriterError {
        RewriterError::Mapping {
            pass: Pass::RelationshipBinder,
            source,
        }
    }

    fn rewrite_opt(&mut self, expr: &Option<Box<Expr>>) -> RewriterResult<Option<Box<Expr>>> {
        expr.as_deref().map(|e| self.rewrite_expr(e).map(Box::new)).transpose()
    }

    /// Everything but the FROM, which the caller tracks in `current_from`.
    fn rewrite_clauses(&mut self, select: &SelectExpr) -> RewriterResult<SelectExpr> {
        Ok(SelectExpr {
            alias: select.alias,
            from: None,
            where_clause: self.rewrite_opt(&select.where_clause)?,
            order_by: rewrite_order_by(self, &select.order_by)?,
            group_by: select
                .group_by
                .iter()
                .map(|g| self.rewrite_expr(g))
                .collect::<RewriterResult<Vec<_>>>()?,
            skip: self.rewrite_opt(&select.skip)?,
            take: self.rewrite_opt(&select.take)?,
            columns: rewrite_columns(self, &select.columns)?,
            is_distinct: select.is_distinct,
            is_reverse: select.is_reverse,
        })
    }
}

impl ExprRewriter for AssociationExpander<'_> {
    type Error = RewriterError;

    fn rewrite_select(&mut self, select: &SelectExpr) -> RewriterResult<SelectExpr> {
        let from = select.from.as_deref().map(|f| self.rewrite_expr(f)).transpose()?;
        let saved = std::mem::replace(&mut self.current_from, from);
        let rewritten = self.rewrite_clauses(select);
        let from = std::mem::replace(&mut self.current_from, saved);
        Ok(SelectExpr {
            from: from.map(Box::new),
            ..rewritten?
        })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> RewriterResult<Expr> {
        let Expr::Member(access) = expr else {
            return walk_expr(self, expr);
        };
        let source = self.rewrite_expr(&access.expr)?;
        let Expr::Entity(entity) = &source else {
            return Ok(bind_member(&source, &access.member));
        };
        let ctx = self.ctx;
        let mapper = ctx.mapper();
        if !mapper.is_relationship(&entity.entity, &access.member) {
            return Ok(bind_member(&source, &access.member));
        }

        let bound = mapper
            .bind_member(ctx.language(), &source, &entity.entity, &access.member)
            .map_err(Self::mapping_error)?;
        let bound = self.rewrite_expr(&bound)?;
        let Expr::Projection(projection) = bound else {
            return Ok(bound);
        };

        let is_singleton = mapper.is_singleton_relationship(&entity.entity, &access.member);
        match self.current_from.take() {
            Some(from) if is_singleton => {
                let projection = ctx.language().add_outer_join_test(projection);
                trace!(
                    "RelationshipBinder: {}.{} outer-applied as {}",
                    entity.entity,
                    access.member,
                    projection.select.alias
                );
                self.current_from = Some(Expr::Join(JoinExpr::new(
                    JoinKind::OuterApply,
                    from,
                    Expr::Select(*projection.select),
                    None,
                )));
                Ok(*projection.projector)
            }
            from => {
                self.current_from = from;
                Ok(Expr::Projection(projection))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::operator::builder::{new_object, Query};
    use crate::query_compiler::relation_expr::NewExpr;
    use crate::query_compiler::test_support::ctx;

    fn expand(query: Query) -> Expr {
        let mut ctx = ctx();
        let bound = bind(&query.into_expr(), &ctx).unwrap();
        let out = RelationshipBinder.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(out.is_yes());
        Arc::unwrap_or_clone(out.get_plan())
    }

    #[test]
    fn test_singleton_in_where_becomes_outer_apply() {
        let query = Query::table("Orders")
            .filter(|o| o.member("Customer").member("City").eq(Expr::constant("London")));
        let Expr::Projection(p) = expand(query) else { panic!() };
        let Some(Expr::Join(join)) = p.select.from.as_deref() else { panic!("expected join") };
        assert_eq!(join.kind, JoinKind::OuterApply);
        let Expr::Select(customer) = join.right.as_ref() else { panic!() };
        let Some(Expr::Binary(eq)) = p.select.where_clause.as_deref() else { panic!() };
        assert_eq!(eq.left.as_column().unwrap().alias, customer.alias);
    }

    #[test]
    fn test_collection_in_projector_becomes_nested_projection() {
        let query = Query::table("Customers").select(|c| {
            new_object([("Id", c.clone().member("CustomerID")), ("Orders", c.member("Orders"))])
        });
        let Expr::Projection(p) = expand(query) else { panic!() };
        let Expr::New(NewExpr { members, .. }) = p.projector.as_ref() else { panic!() };
        let Expr::Projection(orders) = &members[1].expr else { panic!("expected nested projection") };
        assert!(orders.aggregator.is_none());
        assert!(orders.select.where_clause.is_some());
    }

    #[test]
    fn test_unknown_member_is_left_alone() {
        let mut ctx = ctx();
        let bound = bind(&Query::table("Customers").into_expr(), &ctx).unwrap();
        let out = RelationshipBinder.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }
}
