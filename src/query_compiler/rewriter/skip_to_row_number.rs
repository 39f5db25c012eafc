//! SKIP through ROW_NUMBER() for dialects without OFFSET.
//!
//! A select with a skip loses its skip and take, gains a `_rownum` column
//! numbered over its ordering, and is wrapped in a select filtering on that
//! column: `BETWEEN skip + 1 AND skip + take`, or `> skip` without a take.
//! Distinct and grouped selects get an extra layer first so the row number
//! does not take part in the distinct/grouping.

use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{infallible, walk_select, ExprRewriter};
use crate::query_compiler::relation_expr::{
    BetweenExpr, BinaryOp, ColumnDeclaration, ColumnExpr, Expr, OrderExpr, RowNumberExpr, SelectExpr, SqlType, Value,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

const ROW_NUMBER_COLUMN: &str = "_rownum";

pub struct SkipToRowNumberRewriter;

impl RewriterPass for SkipToRowNumberRewriter {
    fn pass(&self) -> Pass {
        Pass::SkipToRowNumber
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let output = infallible(RowNumberPager.rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

/// `a + b`, folded when both are integer constants.
pub(super) fn add_folded(a: &Expr, b: &Expr) -> Expr {
    match (a, b) {
        (Expr::Constant(Value::Int(x)), Expr::Constant(Value::Int(y))) => Expr::constant(x + y),
        _ => Expr::binary(BinaryOp::Add, a.clone(), b.clone()),
    }
}

/// Re-expresses `orderings` over the columns of `inner`, adding columns for
/// expressions it does not already produce.
fn orderings_through(inner: &mut SelectExpr, orderings: &[OrderExpr]) -> Vec<OrderExpr> {
    orderings
        .iter()
        .map(|o| {
            let existing = inner.columns.iter().find(|c| c.expression == o.expression);
            let (name, sql_type) = match existing {
                Some(c) => (c.name.clone(), c.sql_type),
                None => {
                    let base = o.expression.as_column().map(|c| c.name.clone()).unwrap_or_else(|| "o".to_string());
                    let declaration = ColumnDeclaration::new(inner.available_column_name(&base), o.expression.clone());
                    let found = (declaration.name.clone(), declaration.sql_type);
                    inner.columns.push(declaration);
                    found
                }
            };
            OrderExpr::new(o.order_type, Expr::Column(ColumnExpr::new(inner.alias, name, sql_type)))
        })
        .collect()
}

struct RowNumberPager;

impl ExprRewriter for RowNumberPager {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let select = walk_select(self, select)?;
        let Some(skip) = select.skip.as_deref().cloned() else {
            return Ok(select);
        };
        let take = select.take.as_deref().cloned();

        let mut numbered = select.clone().with_skip(None).with_take(None);
        let mut order_by = select.order_by.clone();
        if select.is_distinct || !select.group_by.is_empty() {
            numbered = numbered.add_redundant_select(TableAlias::new());
            if let Some(Expr::Select(inner)) = numbered.from.as_deref_mut() {
                order_by = orderings_through(inner, &order_by);
            }
        }
        numbered.columns.push(ColumnDeclaration {
            name: ROW_NUMBER_COLUMN.to_string(),
            expression: Expr::RowNumber(RowNumberExpr { order_by }),
            sql_type: SqlType::Int,
        });

        let filtered = numbered.add_redundant_select(TableAlias::new()).remove_column(ROW_NUMBER_COLUMN);
        let Some(inner_alias) = filtered.from.as_deref().and_then(Expr::as_select).map(|s| s.alias) else {
            return Ok(select);
        };
        let row_number = Expr::column(inner_alias, ROW_NUMBER_COLUMN, SqlType::Int);
        let predicate = match take {
            Some(take) => Expr::Between(BetweenExpr {
                expr: Box::new(row_number),
                lower: Box::new(add_folded(&skip, &Expr::constant(1))),
                upper: Box::new(add_folded(&skip, &take)),
            }),
            None => Expr::binary(BinaryOp::Gt, row_number, skip),
        };
        trace!("SkipToRowNumber: {} paged over {}", select.alias, inner_alias);
        Ok(filtered.with_where(Some(predicate)))
    }
}
