//! Folds columns of one select that compute the same expression.
//!
//! The first declaration wins; references to the others are re-pointed at
//! it. Set operation sides are left alone since their columns line up by
//! position.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{infallible, walk_expr, walk_select, ExprRewriter};
use crate::query_compiler::relation_expr::{ColumnDeclaration, ColumnExpr, Expr, SelectExpr, SetOperationExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct RedundantColumnRemover;

impl RewriterPass for RedundantColumnRemover {
    fn pass(&self) -> Pass {
        Pass::RedundantColumnRemover
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut remover = DuplicateColumnFolder { map: HashMap::new() };
        let output = infallible(remover.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct DuplicateColumnFolder {
    map: HashMap<(TableAlias, String), ColumnExpr>,
}

impl ExprRewriter for DuplicateColumnFolder {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let select = walk_select(self, select)?;
        let mut kept: Vec<ColumnDeclaration> = Vec::with_capacity(select.columns.len());
        for decl in &select.columns {
            match kept.iter().find(|k| k.expression == decl.expression) {
                Some(first) => {
                    trace!(
                        "RedundantColumnRemover: {}.{} folded into {}",
                        select.alias,
                        decl.name,
                        first.name
                    );
                    self.map.insert(
                        (select.alias, decl.name.clone()),
                        ColumnExpr::new(select.alias, first.name.clone(), first.sql_type),
                    );
                }
                None => kept.push(decl.clone()),
            }
        }
        Ok(SelectExpr { columns: kept, ..select })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Column(c) => Ok(match self.map.get(&(c.alias, c.name.clone())) {
                Some(first) => Expr::Column(first.clone()),
                None => expr.clone(),
            }),
            Expr::SetOperation(set) => Ok(Expr::SetOperation(SetOperationExpr {
                alias: set.alias,
                kind: set.kind,
                left: Box::new(walk_select(self, &set.left)?),
                right: Box::new(walk_select(self, &set.right)?),
            })),
            _ => walk_expr(self, expr),
        }
    }
}
