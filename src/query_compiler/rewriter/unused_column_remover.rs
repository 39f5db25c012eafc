//! Drops select columns nothing reads.
//!
//! The walk is consumers-first: a projection's projector before its select,
//! a select's column list before its clauses and its FROM, a join's
//! condition and right side before its left. Column references mark
//! `(alias, name)` as used; each select then keeps only the marked columns
//! of its own alias. Distinct selects, `COUNT(*)` sources and set operation
//! sides keep everything, since dropping a column would change their rows.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{infallible, rewrite_order_by, walk_expr, ExprRewriter};
use crate::query_compiler::relation_expr::{
    ClientJoinExpr, ColumnDeclaration, Expr, JoinExpr, ProjectionExpr, SelectExpr, SetOperationExpr,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct UnusedColumnRemover;

impl RewriterPass for UnusedColumnRemover {
    fn pass(&self) -> Pass {
        Pass::UnusedColumnRemover
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut remover = ColumnUsage::default();
        let output = infallible(remover.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

#[derive(Default)]
struct ColumnUsage {
    used: HashMap<TableAlias, HashSet<String>>,
    retain_all: bool,
}

impl ColumnUsage {
    fn mark(&mut self, alias: TableAlias, name: &str) {
        self.used.entry(alias).or_default().insert(name.to_string());
    }

    fn mark_single_column(&mut self, select: &SelectExpr) {
        if let Some(first) = select.columns.first() {
            self.mark(select.alias, &first.name);
        }
    }

    fn rewrite_opt(&mut self, expr: &Option<Box<Expr>>) -> Result<Option<Box<Expr>>, Infallible> {
        expr.as_deref().map(|e| self.rewrite_expr(e).map(Box::new)).transpose()
    }

    fn rewrite_all(&mut self, exprs: &[Expr]) -> Result<Vec<Expr>, Infallible> {
        exprs.iter().map(|e| self.rewrite_expr(e)).collect()
    }
}

impl ExprRewriter for ColumnUsage {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let was_retained = std::mem::replace(&mut self.retain_all, false);
        let used = self.used.get(&select.alias).cloned().unwrap_or_default();

        let mut columns = Vec::with_capacity(select.columns.len());
        for decl in &select.columns {
            if was_retained || select.is_distinct || used.contains(&decl.name) {
                columns.push(ColumnDeclaration {
                    name: decl.name.clone(),
                    expression: self.rewrite_expr(&decl.expression)?,
                    sql_type: decl.sql_type,
                });
            }
        }
        if columns.len() < select.columns.len() {
            trace!(
                "UnusedColumnRemover: {} drops {} column(s)",
                select.alias,
                select.columns.len() - columns.len()
            );
        }

        let take = self.rewrite_opt(&select.take)?;
        let skip = self.rewrite_opt(&select.skip)?;
        let group_by = self.rewrite_all(&select.group_by)?;
        let order_by = rewrite_order_by(self, &select.order_by)?;
        let where_clause = self.rewrite_opt(&select.where_clause)?;
        let from = self.rewrite_opt(&select.from)?;

        self.used.remove(&select.alias);
        self.retain_all = was_retained;
        Ok(SelectExpr {
            alias: select.alias,
            columns,
            from,
            where_clause,
            order_by,
            group_by,
            is_distinct: select.is_distinct,
            skip,
            take,
            is_reverse: select.is_reverse,
        })
    }

    fn rewrite_projection(&mut self, projection: &ProjectionExpr) -> Result<ProjectionExpr, Infallible> {
        let projector = self.rewrite_expr(&projection.projector)?;
        let select = self.rewrite_select(&projection.select)?;
        Ok(ProjectionExpr {
            select: Box::new(select),
            projector: Box::new(projector),
            aggregator: projection.aggregator,
        })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Column(c) => {
                self.mark(c.alias, &c.name);
                Ok(expr.clone())
            }
            Expr::Aggregate(a) if a.kind.is_count() && a.argument.is_none() => {
                self.retain_all = true;
                walk_expr(self, expr)
            }
            Expr::Scalar(s) => {
                self.mark_single_column(&s.select);
                walk_expr(self, expr)
            }
            Expr::InSubquery(i) => {
                self.mark_single_column(&i.select);
                walk_expr(self, expr)
            }
            Expr::Join(join) => {
                let condition = self.rewrite_opt(&join.condition)?;
                let right = self.rewrite_expr(&join.right)?;
                let left = self.rewrite_expr(&join.left)?;
                Ok(Expr::Join(JoinExpr {
                    kind: join.kind,
                    left: Box::new(left),
                    right: Box::new(right),
                    condition,
                }))
            }
            Expr::ClientJoin(c) => {
                let inner_key = self.rewrite_all(&c.inner_key)?;
                let outer_key = self.rewrite_all(&c.outer_key)?;
                let projection = self.rewrite_projection(&c.projection)?;
                Ok(Expr::ClientJoin(ClientJoinExpr {
                    projection,
                    outer_key,
                    inner_key,
                }))
            }
            Expr::SetOperation(set) => {
                let saved = std::mem::replace(&mut self.retain_all, true);
                let left = self.rewrite_select(&set.left)?;
                let right = self.rewrite_select(&set.right)?;
                self.retain_all = saved;
                Ok(Expr::SetOperation(SetOperationExpr {
                    alias: set.alias,
                    kind: set.kind,
                    left: Box::new(left),
                    right: Box::new(right),
                }))
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::operator::builder::Query;
    use crate::query_compiler::relation_expr::{AggregateExpr, AggregateKind, JoinKind, SqlType};
    use crate::query_compiler::test_support::ctx;

    fn names(select: &SelectExpr) -> Vec<&str> {
        select.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn inner_select(alias: TableAlias) -> SelectExpr {
        SelectExpr::new(
            alias,
            vec![
                ColumnDeclaration::new("A", Expr::constant(1)),
                ColumnDeclaration::new("B", Expr::constant(2)),
            ],
            None,
            None,
        )
    }

    #[test]
    fn test_unread_source_columns_are_dropped() {
        let mut ctx = ctx();
        let bound = bind(&Query::table("Customers").select(|c| c.member("City")).into_expr(), &ctx).unwrap();
        let out = UnusedColumnRemover.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(out.is_yes());
        let Expr::Projection(p) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };
        let Some(Expr::Select(source)) = p.select.from.as_deref() else { panic!() };
        assert_eq!(names(source), vec!["City"]);
    }

    #[test]
    fn test_count_star_keeps_source_columns() {
        let inner = TableAlias::new();
        let count = Expr::Aggregate(AggregateExpr {
            kind: AggregateKind::Count,
            argument: None,
            is_distinct: false,
        });
        let outer = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("n", count)],
            Some(Expr::Select(inner_select(inner))),
            None,
        );
        let projector = Expr::column(outer.alias, "n", SqlType::Int);
        let expr = Expr::Projection(ProjectionExpr::new(outer, projector));
        let mut ctx = ctx();
        let out = UnusedColumnRemover.rewrite(Arc::new(expr), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }

    #[test]
    fn test_join_condition_keeps_its_columns() {
        let (l, r) = (TableAlias::new(), TableAlias::new());
        let join = Expr::Join(JoinExpr::new(
            JoinKind::Inner,
            Expr::Select(inner_select(l)),
            Expr::Select(inner_select(r)),
            Some(Expr::column(l, "A", SqlType::Int).eq(Expr::column(r, "B", SqlType::Int))),
        ));
        let outer = SelectExpr::new(TableAlias::new(), Vec::new(), Some(join), None);
        let projector = Expr::constant(0);
        let mut ctx = ctx();
        let out = UnusedColumnRemover
            .rewrite(Arc::new(Expr::Projection(ProjectionExpr::new(outer, projector))), &mut ctx)
            .unwrap();
        let Expr::Projection(p) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };
        let Some(Expr::Join(join)) = p.select.from.as_deref() else { panic!() };
        let (Expr::Select(left), Expr::Select(right)) = (join.left.as_ref(), join.right.as_ref()) else { panic!() };
        assert_eq!(names(left), vec!["A"]);
        assert_eq!(names(right), vec!["B"]);
    }
}
