//! Downgrades APPLY joins to ordinary joins where the right side allows it.
//!
//! An APPLY whose right side is a table, or a select that only reaches the
//! left side through its WHERE, becomes a cross/inner/left outer join with
//! that WHERE as the join condition. Paged, grouped, distinct and aggregating
//! right sides keep the APPLY.

use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::projector::project_columns;
use crate::query_compiler::relation_expr::visitors::{
    declared_aliases, has_aggregates, infallible, referenced_aliases, walk_expr, ExprRewriter,
};
use crate::query_compiler::relation_expr::{Expr, JoinExpr, JoinKind, SelectExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct CrossApplyRewriter;

impl RewriterPass for CrossApplyRewriter {
    fn pass(&self) -> Pass {
        Pass::CrossApplyRewriter
    }

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut rewriter = ApplyDowngrader { ctx: &*ctx };
        let output = infallible(rewriter.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct ApplyDowngrader<'a> {
    ctx: &'a CompileCtx,
}

impl ApplyDowngrader<'_> {
    fn downgrade(&self, join: &JoinExpr) -> Option<JoinExpr> {
        match join.right.as_ref() {
            Expr::Table(_) => {
                let kind = match join.kind {
                    JoinKind::CrossApply => JoinKind::Cross,
                    _ => JoinKind::LeftOuter,
                };
                let condition = (kind == JoinKind::LeftOuter).then(always_true);
                Some(JoinExpr {
                    kind,
                    left: join.left.clone(),
                    right: join.right.clone(),
                    condition: condition.map(Box::new),
                })
            }
            Expr::Select(select) if is_flat(select) => {
                let without_where = select.clone().with_where(None);
                let left_aliases = declared_aliases(&join.left);
                let referenced = referenced_aliases(&Expr::Select(without_where.clone()));
                if left_aliases.iter().any(|a| referenced.contains(a)) {
                    return None;
                }
                let (select, condition) = match select.where_clause.as_deref() {
                    Some(predicate) => {
                        let sources = without_where.from.as_deref().map(declared_aliases).unwrap_or_default();
                        let pc = project_columns(
                            self.ctx.language(),
                            self.ctx.affinity(),
                            predicate,
                            &without_where.columns,
                            without_where.alias,
                            &sources,
                        );
                        (without_where.with_columns(pc.columns), Some(pc.projector))
                    }
                    None => (without_where, None),
                };
                let (kind, condition) = match (join.kind, condition) {
                    (JoinKind::OuterApply, condition) => {
                        (JoinKind::LeftOuter, Some(condition.unwrap_or_else(always_true)))
                    }
                    (_, None) => (JoinKind::Cross, None),
                    (_, condition) => (JoinKind::Inner, condition),
                };
                Some(JoinExpr::new(kind, (*join.left).clone(), Expr::Select(select), condition))
            }
            _ => None,
        }
    }
}

/// `1 = 1`, for outer joins that need an ON clause but have no predicate.
fn always_true() -> Expr {
    Expr::constant(1).eq(Expr::constant(1))
}

/// No paging, grouping or aggregation that would change meaning once the
/// WHERE moves into an ON clause.
fn is_flat(select: &SelectExpr) -> bool {
    select.take.is_none()
        && select.skip.is_none()
        && select.group_by.is_empty()
        && !select.is_distinct
        && !has_aggregates(select)
}

impl ExprRewriter for ApplyDowngrader<'_> {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        let rewritten = walk_expr(self, expr)?;
        if let Expr::Join(join) = &rewritten {
            if join.kind.is_apply() {
                if let Some(downgraded) = self.downgrade(join) {
                    trace!("CrossApplyRewriter: {:?} -> {:?}", join.kind, downgraded.kind);
                    return Ok(Expr::Join(downgraded));
                }
            }
        }
        Ok(rewritten)
    }
}
