//! Keeps comma-style cross joins and keyword joins out of the same FROM.
//!
//! A join nested directly under a join of the other family (cross vs.
//! inner/outer/apply) is wrapped in its own select exporting the columns
//! referenced through it, and every later reference is re-pointed there.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{
    declared_aliases, infallible, referenced_columns, walk_expr, walk_select, ExprRewriter,
};
use crate::query_compiler::relation_expr::{ColumnDeclaration, ColumnExpr, Expr, JoinKind, SelectExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct CrossJoinIsolator;

impl RewriterPass for CrossJoinIsolator {
    fn pass(&self) -> Pass {
        Pass::CrossJoinIsolator
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut columns: HashMap<TableAlias, Vec<ColumnExpr>> = HashMap::new();
        for column in referenced_columns(&expr) {
            columns.entry(column.alias).or_default().push(column);
        }
        let mut isolator = Isolator {
            columns,
            map: HashMap::new(),
            last_join: None,
        };
        let output = infallible(isolator.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct Isolator {
    /// Every column reference in the tree, by alias.
    columns: HashMap<TableAlias, Vec<ColumnExpr>>,
    map: HashMap<ColumnExpr, ColumnExpr>,
    last_join: Option<JoinKind>,
}

impl Isolator {
    fn make_subquery(&mut self, source: Expr) -> Expr {
        let alias = TableAlias::new();
        let mut select = SelectExpr::new(alias, Vec::new(), None, None);
        for declared in declared_aliases(&source) {
            for column in self.columns.get(&declared).into_iter().flatten() {
                let name = select.available_column_name(&column.name);
                select
                    .columns
                    .push(ColumnDeclaration::new(name.clone(), Expr::Column(column.clone())));
                self.map
                    .insert(column.clone(), ColumnExpr::new(alias, name, column.sql_type));
            }
        }
        trace!("CrossJoinIsolator: isolated join as {}", alias);
        Expr::Select(select.with_from(Some(source)))
    }
}

impl ExprRewriter for Isolator {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let saved = self.last_join.take();
        let result = walk_select(self, select);
        self.last_join = saved;
        result
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Column(c) => Ok(self.map.get(c).cloned().map(Expr::Column).unwrap_or_else(|| expr.clone())),
            Expr::Join(join) => {
                let saved = self.last_join.replace(join.kind);
                let rewritten = walk_expr(self, expr);
                self.last_join = saved;
                let rewritten = rewritten?;
                match self.last_join {
                    Some(parent) if (join.kind == JoinKind::Cross) != (parent == JoinKind::Cross) => {
                        Ok(self.make_subquery(rewritten))
                    }
                    _ => Ok(rewritten),
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}
