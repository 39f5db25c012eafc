//! Re-attaches group aggregates to the select that owns their GROUP BY.
//!
//! The binder leaves aggregates over a group's element subquery as
//! [`AggregateSubqueryExpr`] nodes. When the grouped select is part of the
//! tree, each one becomes an `aggN` column of that select and the node is
//! replaced by a reference to it, so N aggregates over one group cost no
//! subqueries at all. Anything left over runs as a correlated scalar
//! subquery.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{
    infallible, walk_expr, walk_expr_ref, walk_select, ExprRewriter, ExprVisitor,
};
use crate::query_compiler::relation_expr::{
    AggregateSubqueryExpr, ColumnDeclaration, ColumnExpr, Expr, SelectExpr, SubqueryExpr,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct AggregateRewriter;

impl RewriterPass for AggregateRewriter {
    fn pass(&self) -> Pass {
        Pass::AggregateRewriter
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut gatherer = AggregateGatherer::default();
        gatherer.visit_expr(&expr);
        if gatherer.by_group.is_empty() {
            return Ok(Transformed::No(expr));
        }
        let mut rewriter = Rewriter {
            lookup: gatherer.by_group,
            map: HashMap::new(),
        };
        let output = infallible(rewriter.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

#[derive(Default)]
struct AggregateGatherer {
    by_group: HashMap<TableAlias, Vec<AggregateSubqueryExpr>>,
    seen: HashSet<u64>,
}

impl ExprVisitor for AggregateGatherer {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::AggregateSubquery(a) = expr {
            if self.seen.insert(a.correlation_id) {
                self.by_group.entry(a.group_by_alias).or_default().push(a.clone());
            }
        }
        walk_expr_ref(self, expr)
    }
}

struct Rewriter {
    lookup: HashMap<TableAlias, Vec<AggregateSubqueryExpr>>,
    map: HashMap<u64, ColumnExpr>,
}

impl ExprRewriter for Rewriter {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let mut select = walk_select(self, select)?;
        if let Some(aggregates) = self.lookup.remove(&select.alias) {
            for aggregate in aggregates {
                let name = select.available_column_name(&format!("agg{}", select.columns.len()));
                let declaration = ColumnDeclaration::new(name.clone(), (*aggregate.aggregate_in_group_select).clone());
                self.map.insert(
                    aggregate.correlation_id,
                    ColumnExpr::new(select.alias, name, declaration.sql_type),
                );
                select.columns.push(declaration);
            }
        }
        Ok(select)
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::AggregateSubquery(a) => match self.map.get(&a.correlation_id) {
                Some(column) => Ok(Expr::Column(column.clone())),
                None => Ok(Expr::Scalar(SubqueryExpr::new(self.rewrite_select(&a.subquery.select)?))),
            },
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::operator::builder::{new_object, Query};
    use crate::query_compiler::relation_expr::visitors::referenced_columns;
    use crate::query_compiler::test_support::ctx;

    fn group_counts() -> Expr {
        Query::table("Customers")
            .group_by(|c| c.member("City"))
            .select(|g| {
                new_object([
                    ("City", g.clone().member("Key")),
                    ("Count", Query::of(g.clone()).count()),
                    ("Longest", Query::of(g).max(|c| c.member("CompanyName"))),
                ])
            })
            .into_expr()
    }

    #[test]
    fn test_group_aggregates_become_columns_of_grouped_select() {
        let mut ctx = ctx();
        let bound = bind(&group_counts(), &ctx).unwrap();
        let out = AggregateRewriter.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(out.is_yes());
        let Expr::Projection(p) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };
        let Some(Expr::Select(grouped)) = p.select.from.as_deref() else { panic!() };
        assert!(!grouped.group_by.is_empty());
        let aggregates: Vec<&str> = grouped
            .columns
            .iter()
            .filter(|c| matches!(c.expression, Expr::Aggregate(_)))
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(aggregates.len(), 2);
        assert!(aggregates.iter().all(|n| n.starts_with("agg")));
        // outer columns now read the grouped select
        for column in &p.select.columns {
            for c in referenced_columns(&column.expression) {
                assert_eq!(c.alias, grouped.alias);
            }
        }
    }

    #[test]
    fn test_no_group_aggregates_is_untouched() {
        let mut ctx = ctx();
        let bound = bind(&Query::table("Customers").into_expr(), &ctx).unwrap();
        let out = AggregateRewriter.rewrite(Arc::new(bound), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }
}
