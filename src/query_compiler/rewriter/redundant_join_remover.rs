//! Drops a join whose right side repeats one already joined further left.
//!
//! Two accesses to the same singleton association each add their own OUTER
//! APPLY; once both are plain joins with equivalent sources and conditions,
//! the later one is removed and its alias re-pointed at the earlier one.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::comparer::{are_equal, are_equal_with_scope};
use crate::query_compiler::relation_expr::visitors::{infallible, walk_expr, ExprRewriter};
use crate::query_compiler::relation_expr::{ColumnExpr, Expr, JoinExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct RedundantJoinRemover;

impl RewriterPass for RedundantJoinRemover {
    fn pass(&self) -> Pass {
        Pass::RedundantJoinRemover
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut remover = JoinDeduplicator { map: HashMap::new() };
        let output = infallible(remover.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

struct JoinDeduplicator {
    /// Removed right-side alias -> surviving equivalent alias.
    map: HashMap<TableAlias, TableAlias>,
}

fn source_alias(expr: &Expr) -> Option<TableAlias> {
    match expr {
        Expr::Table(t) => Some(t.alias),
        Expr::Select(s) => Some(s.alias),
        Expr::SetOperation(s) => Some(s.alias),
        _ => None,
    }
}

/// Searches the join tree under `join` for a right side equivalent to
/// `compare_to.right`, joined the same way on an equivalent condition.
fn find_similar_right<'a>(join: &'a Expr, compare_to: &JoinExpr) -> Option<&'a Expr> {
    let Expr::Join(join) = join else { return None };
    if join.kind == compare_to.kind && are_equal(&join.right, &compare_to.right) {
        let conditions_match = match (join.condition.as_deref(), compare_to.condition.as_deref()) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a == b
                    || match (source_alias(&join.right), source_alias(&compare_to.right)) {
                        (Some(x), Some(y)) => are_equal_with_scope(a, b, &HashMap::from([(x, y)])),
                        _ => false,
                    }
            }
            _ => false,
        };
        if conditions_match {
            return Some(&join.right);
        }
    }
    find_similar_right(&join.left, compare_to).or_else(|| find_similar_right(&join.right, compare_to))
}

impl ExprRewriter for JoinDeduplicator {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Column(c) => Ok(match self.map.get(&c.alias) {
                Some(mapped) => Expr::Column(ColumnExpr::new(*mapped, c.name.clone(), c.sql_type)),
                None => expr.clone(),
            }),
            Expr::Join(_) => {
                let rewritten = walk_expr(self, expr)?;
                let Expr::Join(join) = &rewritten else { return Ok(rewritten) };
                let similar = source_alias(&join.right)
                    .zip(find_similar_right(&join.left, join).and_then(source_alias));
                match similar {
                    Some((removed, kept)) => {
                        trace!("RedundantJoinRemover: {} duplicates {}", removed, kept);
                        self.map.insert(removed, kept);
                        Ok((*join.left).clone())
                    }
                    None => Ok(rewritten),
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::relation_expr::{ColumnDeclaration, JoinKind, SelectExpr, SqlType, TableExpr};
    use crate::query_compiler::test_support::ctx;

    fn table(name: &str) -> (TableAlias, Expr) {
        let alias = TableAlias::new();
        let table = Expr::Table(TableExpr {
            alias,
            entity: name.to_string(),
            name: name.to_string(),
        });
        (alias, table)
    }

    fn customers() -> (TableAlias, Expr) {
        let (t, table) = table("Customers");
        let alias = TableAlias::new();
        let select = SelectExpr::new(
            alias,
            vec![
                ColumnDeclaration::new("CustomerID", Expr::column(t, "CustomerID", SqlType::Text)),
                ColumnDeclaration::new("City", Expr::column(t, "City", SqlType::Text)),
            ],
            Some(table),
            None,
        );
        (alias, Expr::Select(select))
    }

    fn on_customer(o: TableAlias, c: TableAlias) -> Expr {
        Expr::column(o, "CustomerID", SqlType::Text).eq(Expr::column(c, "CustomerID", SqlType::Text))
    }

    #[test]
    fn test_repeated_outer_join_is_removed() {
        let (o, orders) = table("Orders");
        let (c1, first) = customers();
        let (c2, second) = customers();
        let inner = Expr::Join(JoinExpr::new(JoinKind::LeftOuter, orders, first, Some(on_customer(o, c1))));
        let outer = Expr::Join(JoinExpr::new(JoinKind::LeftOuter, inner.clone(), second, Some(on_customer(o, c2))));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("City", Expr::column(c2, "City", SqlType::Text))],
            Some(outer),
            None,
        );

        let mut ctx = ctx();
        let out = RedundantJoinRemover.rewrite(Arc::new(Expr::Select(select)), &mut ctx).unwrap();
        assert!(out.is_yes());
        let Expr::Select(select) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };
        assert_eq!(select.from.as_deref(), Some(&inner));
        assert_eq!(select.columns[0].expression, Expr::column(c1, "City", SqlType::Text));
    }

    #[test]
    fn test_different_conditions_are_kept() {
        let (o, orders) = table("Orders");
        let (c1, first) = customers();
        let (c2, second) = customers();
        let inner = Expr::Join(JoinExpr::new(JoinKind::LeftOuter, orders, first, Some(on_customer(o, c1))));
        let other = Expr::column(o, "ShipCity", SqlType::Text).eq(Expr::column(c2, "City", SqlType::Text));
        let outer = Expr::Join(JoinExpr::new(JoinKind::LeftOuter, inner, second, Some(other)));
        let select = SelectExpr::new(TableAlias::new(), Vec::new(), Some(outer), None);
        let mut ctx = ctx();
        let out = RedundantJoinRemover.rewrite(Arc::new(Expr::Select(select)), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }
}
