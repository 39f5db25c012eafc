//! Turns correlated nested projections into client-side joins.
//!
//! A nested projection that reads columns of its owner's select would
//! otherwise be executed once per outer row. Instead the owner's correlation
//! keys are selected DISTINCT from a copy of the owner, the nested select is
//! cross-applied to them, and the outer and inner rows are matched in memory
//! on those keys. One extra query per nesting level, whatever the row count.

use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::duplicator::duplicate_select;
use crate::query_compiler::projector::project_columns;
use crate::query_compiler::relation_expr::visitors::{
    free_aliases, infallible, map_column_aliases, referenced_columns, walk_expr, ExprRewriter,
};
use crate::query_compiler::relation_expr::{
    ClientJoinExpr, ColumnDeclaration, ColumnExpr, Expr, JoinExpr, JoinKind, ProjectionExpr, SelectExpr,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct ClientJoinRewriter;

impl RewriterPass for ClientJoinRewriter {
    fn pass(&self) -> Pass {
        Pass::ClientJoin
    }

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut rewriter = ClientJoiner {
            ctx: &*ctx,
            is_top_level: true,
            current_select: None,
        };
        let output = infallible(rewriter.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct ClientJoiner<'a> {
    ctx: &'a CompileCtx,
    is_top_level: bool,
    current_select: Option<SelectExpr>,
}

impl ClientJoiner<'_> {
    fn as_top_level<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved_top = std::mem::replace(&mut self.is_top_level, true);
        let saved_select = self.current_select.take();
        let result = f(self);
        self.is_top_level = saved_top;
        self.current_select = saved_select;
        result
    }

    /// Builds the client join for `projection` nested under `outer`, or
    /// `None` when it is uncorrelated or reaches past its owner.
    fn client_join(&self, outer: &SelectExpr, projection: &ProjectionExpr) -> Option<ClientJoinExpr> {
        let nested = Expr::Projection(projection.clone());
        let free = free_aliases(&nested);
        if free.is_empty() || free.iter().any(|a| *a != outer.alias) {
            return None;
        }
        let keys: Vec<ColumnExpr> = referenced_columns(&nested)
            .into_iter()
            .filter(|c| c.alias == outer.alias)
            .collect();

        // DISTINCT keys over a private copy of the owner
        let outer_copy = duplicate_select(outer);
        let key_alias = TableAlias::new();
        let key_columns = keys
            .iter()
            .map(|k| {
                ColumnDeclaration::new(
                    k.name.clone(),
                    Expr::Column(ColumnExpr::new(outer_copy.alias, k.name.clone(), k.sql_type)),
                )
            })
            .collect();
        let key_select = SelectExpr::new(key_alias, key_columns, Some(Expr::Select(outer_copy)), None).with_distinct(true);

        let Expr::Projection(inner) = map_column_aliases(&nested, key_alias, &[outer.alias]) else {
            return None;
        };

        let joined_alias = TableAlias::new();
        let pc = project_columns(
            self.ctx.language(),
            self.ctx.affinity(),
            &inner.projector,
            &[],
            joined_alias,
            &[key_alias, inner.select.alias],
        );
        let join = JoinExpr::new(JoinKind::CrossApply, Expr::Select(key_select), Expr::Select(*inner.select), None);
        let mut joined = SelectExpr::new(joined_alias, pc.columns, Some(Expr::Join(join)), None);

        let mut inner_key = Vec::with_capacity(keys.len());
        for key in &keys {
            let expr = Expr::Column(ColumnExpr::new(key_alias, key.name.clone(), key.sql_type));
            let name = match joined.columns.iter().find(|c| c.expression == expr) {
                Some(existing) => existing.name.clone(),
                None => {
                    let name = joined.available_column_name(&key.name);
                    joined.columns.push(ColumnDeclaration::new(name.clone(), expr));
                    name
                }
            };
            inner_key.push(Expr::Column(ColumnExpr::new(joined_alias, name, key.sql_type)));
        }
        trace!(
            "ClientJoin: {} joined to {} on {} key(s)",
            joined_alias,
            outer.alias,
            keys.len()
        );

        Some(ClientJoinExpr {
            projection: ProjectionExpr::new(joined, pc.projector).with_aggregator(inner.aggregator),
            outer_key: keys.into_iter().map(Expr::Column).collect(),
            inner_key,
        })
    }

    fn rewrite_nested(&mut self, projection: &ProjectionExpr) -> Result<Expr, Infallible> {
        let joined = self
            .current_select
            .as_ref()
            .and_then(|outer| self.client_join(outer, projection));
        match joined {
            Some(join) => {
                let projection = self.as_top_level(|this| this.rewrite_projection(&join.projection))?;
                Ok(Expr::ClientJoin(ClientJoinExpr { projection, ..join }))
            }
            None => self.as_top_level(|this| this.rewrite_projection(projection).map(Expr::Projection)),
        }
    }
}

impl ExprRewriter for ClientJoiner<'_> {
    type Error = Infallible;

    fn rewrite_projection(&mut self, projection: &ProjectionExpr) -> Result<ProjectionExpr, Infallible> {
        self.is_top_level = false;
        let saved = self.current_select.replace((*projection.select).clone());
        let projector = self.rewrite_expr(&projection.projector);
        self.current_select = saved;
        Ok(ProjectionExpr {
            select: projection.select.clone(),
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
            _ => walk_expr(self, expr),
        }
    }
}
