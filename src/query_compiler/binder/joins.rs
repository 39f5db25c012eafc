//! SelectMany, Join and GroupJoin.
//!
//! The join kind follows the shape of the right-hand side: a bare table
//! becomes a cross join, anything else may be correlated to the left and
//! becomes an apply. A `DefaultIfEmpty` collection selects the outer apply
//! and exposes an outer-join test column on the right side.

use super::{Binder, BinderResult};
use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::operator::QueryOp;
use crate::query_compiler::relation_expr::{Expr, JoinExpr, JoinKind, Lambda, ProjectionExpr, SelectExpr};
use crate::query_compiler::relation_expr::visitors::ExprRewriter;

impl Binder<'_> {
    pub(super) fn bind_select_many(
        &mut self,
        source: &Expr,
        collection_selector: &Lambda,
        result_selector: Option<&Lambda>,
    ) -> BinderResult<ProjectionExpr> {
        let projection = self.visit_sequence(source)?;
        self.map_param("SelectMany", collection_selector, 0, (*projection.projector).clone())?;

        let (collection, default_if_empty) = match collection_selector.body.as_ref() {
            Expr::Operator(op) => match op.as_ref() {
                QueryOp::DefaultIfEmpty { source } => (source, true),
                _ => (collection_selector.body.as_ref(), false),
            },
            other => (other, false),
        };

        let mut collection_projection = self.visit_sequence(collection)?;
        let is_table = matches!(collection_projection.select.from.as_deref(), Some(Expr::Table(_)));
        let kind = if is_table {
            JoinKind::Cross
        } else if default_if_empty {
            JoinKind::OuterApply
        } else {
            JoinKind::CrossApply
        };
        if kind == JoinKind::OuterApply {
            collection_projection = self.ctx.language().add_outer_join_test(collection_projection);
        }

        let left_alias = projection.select.alias;
        let right_alias = collection_projection.select.alias;
        let alias = TableAlias::new();
        let result = match result_selector {
            None => (*collection_projection.projector).clone(),
            Some(selector) => {
                self.map_param("SelectMany", selector, 0, (*projection.projector).clone())?;
                self.map_param("SelectMany", selector, 1, (*collection_projection.projector).clone())?;
                self.rewrite_expr(&selector.body)?
            }
        };
        let pc = self.project(&result, alias, &[left_alias, right_alias]);
        let join = JoinExpr::new(
            kind,
            Expr::Select(*projection.select),
            Expr::Select(*collection_projection.select),
            None,
        );
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Join(join)), None),
            pc.projector,
        ))
    }

    pub(super) fn bind_join(
        &mut self,
        outer: &Expr,
        inner: &Expr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result_selector: &Lambda,
    ) -> BinderResult<ProjectionExpr> {
        let outer_projection = self.visit_sequence(outer)?;
        let inner_projection = self.visit_sequence(inner)?;

        let outer_key_expr = self.bind_lambda("Join", outer_key, (*outer_projection.projector).clone())?;
        let inner_key_expr = self.bind_lambda("Join", inner_key, (*inner_projection.projector).clone())?;
        self.map_param("Join", result_selector, 0, (*outer_projection.projector).clone())?;
        self.map_param("Join", result_selector, 1, (*inner_projection.projector).clone())?;
        let result = self.rewrite_expr(&result_selector.body)?;

        let alias = TableAlias::new();
        let pc = self.project(
            &result,
            alias,
            &[outer_projection.select.alias, inner_projection.select.alias],
        );
        let join = JoinExpr::new(
            JoinKind::Inner,
            Expr::Select(*outer_projection.select),
            Expr::Select(*inner_projection.select),
            Some(outer_key_expr.eq(inner_key_expr)),
        );
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Join(join)), None),
            pc.projector,
        ))
    }

    /// Binds the group as `inner.Where(i => inner_key(i) == outer_key(o))`,
    /// a nested projection correlated to each outer row.
    pub(super) fn bind_group_join(
        &mut self,
        outer: &Expr,
        inner: &Expr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result_selector: &Lambda,
    ) -> BinderResult<ProjectionExpr> {
        let outer_projection = self.visit_sequence(outer)?;
        self.map_param("GroupJoin", outer_key, 0, (*outer_projection.projector).clone())?;

        let predicate = Lambda {
            params: inner_key.params.clone(),
            body: Box::new((*inner_key.body).clone().eq((*outer_key.body).clone())),
        };
        let group = Expr::Projection(self.bind_where(inner, &predicate)?);

        self.map_param("GroupJoin", result_selector, 0, (*outer_projection.projector).clone())?;
        self.map_param("GroupJoin", result_selector, 1, group)?;
        let result = self.rewrite_expr(&result_selector.body)?;

        let alias = TableAlias::new();
        let pc = self.project(&result, alias, &[outer_projection.select.alias]);
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Select(*outer_projection.select)), None),
            pc.projector,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::operator::builder::{new_object, Query};
    use crate::query_compiler::relation_expr::{Expr, JoinKind};
    use crate::query_compiler::test_support::ctx;

    fn join_kind(expr: &Expr) -> JoinKind {
        let Expr::Projection(p) = expr else { panic!("expected projection") };
        let Some(Expr::Join(join)) = p.select.from.as_deref() else { panic!("expected join") };
        join.kind
    }

    #[test]
    fn test_select_many_over_table_is_cross_join() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .select_many(|_| Query::table("Orders").into_expr())
            .into_expr();
        assert_eq!(join_kind(&bind(&query, &ctx).unwrap()), JoinKind::Cross);
    }

    #[test]
    fn test_select_many_over_association_is_cross_apply() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .select_many(|c| c.member("Orders"))
            .into_expr();
        assert_eq!(join_kind(&bind(&query, &ctx).unwrap()), JoinKind::CrossApply);
    }

    #[test]
    fn test_default_if_empty_is_outer_apply_with_test_column() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .select_many(|c| Query::of(c.member("Orders")).default_if_empty().into_expr())
            .into_expr();
        let bound = bind(&query, &ctx).unwrap();
        assert_eq!(join_kind(&bound), JoinKind::OuterApply);
        let Expr::Projection(p) = bound else { unreachable!() };
        assert!(matches!(*p.projector, Expr::OuterJoined(_)));
    }

    #[test]
    fn test_join_is_inner_join_on_keys() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .join(
                Query::table("Orders"),
                |c| c.member("CustomerID"),
                |o| o.member("CustomerID"),
                |c, o| new_object([("City", c.member("City")), ("OrderID", o.member("OrderID"))]),
            )
            .into_expr();
        let bound = bind(&query, &ctx).unwrap();
        assert_eq!(join_kind(&bound), JoinKind::Inner);
    }

    #[test]
    fn test_group_join_binds_group_as_nested_projection() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .group_join(
                Query::table("Orders"),
                |c| c.member("CustomerID"),
                |o| o.member("CustomerID"),
                |c, os| new_object([("Customer", c), ("Orders", os)]),
            )
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        let Expr::New(shape) = p.projector.as_ref() else { panic!("expected new") };
        assert!(matches!(shape.member("Orders"), Some(Expr::Projection(_))));
    }
}
