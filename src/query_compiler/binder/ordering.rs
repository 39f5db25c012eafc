//! OrderBy and ThenBy.
//!
//! ThenBy operators wrap their OrderBy, so they are met first on the way
//! down. Each one is buffered and the buffer is flushed, last-declared-first,
//! once the primary OrderBy has bound its source.

use std::mem;

use super::{Binder, BinderResult};
use crate::query_compiler::relation_expr::{Expr, Lambda, OrderExpr, OrderType, ProjectionExpr};
use crate::query_compiler::relation_expr::visitors::ExprRewriter;

impl Binder<'_> {
    pub(super) fn bind_order_by(
        &mut self,
        source: &Expr,
        key: &Lambda,
        order_type: OrderType,
    ) -> BinderResult<ProjectionExpr> {
        let then_bys = mem::take(&mut self.then_bys);
        let projection = self.visit_sequence(source)?;

        let mut orderings = vec![OrderExpr::new(
            order_type,
            self.bind_lambda("OrderBy", key, (*projection.projector).clone())?,
        )];
        for (then_key, then_type) in then_bys.iter().rev() {
            let expression = self.bind_lambda("ThenBy", then_key, (*projection.projector).clone())?;
            orderings.push(OrderExpr::new(*then_type, expression));
        }

        Ok(self.wrap_projection(projection, |select| select.with_order_by(orderings)))
    }

    pub(super) fn bind_then_by(&mut self, source: &Expr, key: &Lambda, order_type: OrderType) -> BinderResult<Expr> {
        self.then_bys.push((key.clone(), order_type));
        self.rewrite_expr(source)
    }
}
