//! Folds nested singleton projections into their owner as OUTER APPLY joins.
//!
//! A `SingleOrDefault`-style projection nested in a projector would run once
//! per outer row. When the owning select is not distinct, grouped or
//! aggregated, its clauses move into a redundant inner select, the singleton's
//! select is outer-applied to that, and the nested projector is re-projected
//! through the owner's columns. Members deferred by the query policy are left
//! nested for the client join pass.

use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::projector::project_columns;
use crate::query_compiler::relation_expr::visitors::{
    has_aggregates, infallible, substitute_columns_in_select, walk_expr, ExprRewriter,
};
use crate::query_compiler::relation_expr::{
    ColumnExpr, Expr, JoinExpr, JoinKind, MemberBinding, NewExpr, ProjectionExpr, SelectExpr,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct SingletonProjectionRewriter;

impl RewriterPass for SingletonProjectionRewriter {
    fn pass(&self) -> Pass {
        Pass::SingletonProjection
    }

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut rewriter = SingletonJoiner {
            ctx: &*ctx,
            is_top_level: true,
            current_select: None,
            current_member: None,
        };
        let output = infallible(rewriter.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct SingletonJoiner<'a> {
    ctx: &'a CompileCtx,
    is_top_level: bool,
    /// Select owning the projector being visited.
    current_select: Option<SelectExpr>,
    /// `(type name, member)` of the enclosing object member binding.
    current_member: Option<(Option<String>, String)>,
}

fn can_join_on_server(select: &SelectExpr) -> bool {
    !select.is_distinct && select.group_by.is_empty() && !has_aggregates(select)
}

impl SingletonJoiner<'_> {
    fn is_deferred(&self) -> bool {
        self.current_member
            .as_ref()
            .is_some_and(|(entity, member)| self.ctx.policy().is_deferred(entity.as_deref(), member))
    }

    fn as_top_level<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved_top = std::mem::replace(&mut self.is_top_level, true);
        let saved_select = self.current_select.take();
        let result = f(self);
        self.is_top_level = saved_top;
        self.current_select = saved_select;
        result
    }

    /// Outer-applies `projection` onto `current`. Returns the rebuilt owner
    /// select and the singleton's projector over the owner's columns.
    fn join_singleton(&self, current: SelectExpr, projection: &ProjectionExpr) -> Option<(SelectExpr, Expr)> {
        let language = self.ctx.language();
        let owner_alias = current.alias;
        let inner_alias = TableAlias::new();
        let owner = current.add_redundant_select(inner_alias);

        let source = substitute_columns_in_select(&projection.select, |c| {
            (c.alias == owner_alias).then(|| Expr::Column(ColumnExpr::new(inner_alias, c.name.clone(), c.sql_type)))
        });
        let joined = language.add_outer_join_test(ProjectionExpr::new(source, (*projection.projector).clone()));
        let pc = project_columns(
            language,
            self.ctx.affinity(),
            &joined.projector,
            &owner.columns,
            owner_alias,
            &[inner_alias, joined.select.alias],
        );
        trace!(
            "SingletonProjection: {} outer-applied into {}",
            joined.select.alias,
            owner_alias
        );
        let from = owner.from?;
        let join = JoinExpr {
            kind: JoinKind::OuterApply,
            left: from,
            right: Box::new(Expr::Select(*joined.select)),
            condition: None,
        };
        Some((
            SelectExpr::new(owner_alias, pc.columns, Some(Expr::Join(join)), None),
            pc.projector,
        ))
    }

    fn rewrite_nested(&mut self, projection: &ProjectionExpr) -> Result<Expr, Infallible> {
        if projection.is_singleton() && !self.is_deferred() {
            if let Some(current) = self.current_select.take() {
                if can_join_on_server(&current) {
                    if let Some((select, projector)) = self.join_singleton(current.clone(), projection) {
                        self.current_select = Some(select);
                        return self.rewrite_expr(&projector);
                    }
                }
                self.current_select = Some(current);
            }
        }
        self.as_top_level(|this| this.rewrite_projection(projection).map(Expr::Projection))
    }
}

impl ExprRewriter for SingletonJoiner<'_> {
    type Error = Infallible;

    fn rewrite_projection(&mut self, projection: &ProjectionExpr) -> Result<ProjectionExpr, Infallible> {
        self.is_top_level = false;
        let saved = self.current_select.replace((*projection.select).clone());
        let projector = self.rewrite_expr(&projection.projector);
        let select = std::mem::replace(&mut self.current_select, saved);
        Ok(ProjectionExpr {
            select: Box::new(select.unwrap_or_else(|| (*projection.select).clone())),
            projector: Box::new(projector?),
            aggregator: projection.aggregator,
        })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Projection(p) if self.is_top_level => self.rewrite_projection(p).map(Expr::Projection),
            Expr::Projection(p) => self.rewrite_nested(p),
            Expr::ClientJoin(_) | Expr::Command(_) => self.as_top_level(|this| walk_expr(this, expr)),
            Expr::Scalar(_) | Expr::Exists(_) | Expr::InSubquery(_) => Ok(expr.clone()),
            Expr::New(new) => {
                let mut members = Vec::with_capacity(new.members.len());
                for binding in &new.members {
                    let saved = self
                        .current_member
                        .replace((new.type_name.clone(), binding.name.clone()));
                    let rewritten = self.rewrite_expr(&binding.expr);
                    self.current_member = saved;
                    members.push(MemberBinding {
                        name: binding.name.clone(),
                        expr: rewritten?,
                    });
                }
                Ok(Expr::New(NewExpr {
                    type_name: new.type_name.clone(),
                    members,
                }))
            }
            _ => walk_expr(self, expr),
        }
    }
}
