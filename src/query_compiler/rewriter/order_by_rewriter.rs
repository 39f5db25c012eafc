//! ORDER BY hoisting.
//!
//! SQL only honours ordering in the outermost select, or in a select that
//! also pages with TOP/OFFSET. Orderings found deeper in the tree are
//! gathered bottom-up, rebound to each enclosing select's columns (adding
//! columns where needed) and re-emitted where they are meaningful. A select
//! that groups or is distinct stops the propagation; `is_reverse` is resolved
//! here by inverting everything gathered so far.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{
    declared_aliases, has_aggregates, infallible, walk_expr, walk_select, ExprRewriter,
};
use crate::query_compiler::relation_expr::{
    ColumnDeclaration, ColumnExpr, Expr, JoinExpr, OrderExpr, SelectExpr, SetOperationExpr,
};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct OrderByRewriter;

impl RewriterPass for OrderByRewriter {
    fn pass(&self) -> Pass {
        Pass::OrderByRewriter
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let output = infallible(OrderingHoister::new().rewrite_expr(&expr));
        Ok(transformed_if_changed(expr, output))
    }
}

/// Hoists orderings within `select`, treating it as the outermost select.
pub(super) fn hoist_orderings(select: &SelectExpr) -> SelectExpr {
    infallible(OrderingHoister::new().rewrite_select(select))
}

struct OrderingHoister {
    gathered: Vec<OrderExpr>,
    is_outermost: bool,
}

impl OrderingHoister {
    fn new() -> Self {
        OrderingHoister {
            gathered: Vec::new(),
            is_outermost: true,
        }
    }

    /// Puts `orderings` in front of what was gathered, dropping repeats of
    /// the same column.
    fn prepend(&mut self, orderings: &[OrderExpr]) {
        if orderings.is_empty() {
            return;
        }
        let mut merged = orderings.to_vec();
        merged.append(&mut self.gathered);
        let mut seen = HashSet::new();
        merged.retain(|o| match &o.expression {
            Expr::Column(c) => seen.insert((c.alias, c.name.clone())),
            _ => true,
        });
        self.gathered = merged;
    }

    fn reverse(&mut self) {
        for ordering in &mut self.gathered {
            ordering.order_type = ordering.order_type.inverted();
        }
    }

    fn isolated<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::take(&mut self.gathered);
        let result = f(self);
        self.gathered = saved;
        result
    }
}

impl ExprRewriter for OrderingHoister {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let is_outermost = std::mem::replace(&mut self.is_outermost, false);
        let select = walk_select(self, select);
        self.is_outermost = is_outermost;
        let select = select?;

        let has_group_by = !select.group_by.is_empty();
        let can_have_order_by = is_outermost || select.take.is_some() || select.skip.is_some();
        let can_receive = can_have_order_by && !has_group_by && !select.is_distinct && !has_aggregates(&select);

        self.prepend(&select.order_by);
        if select.is_reverse {
            self.reverse();
        }

        let order_by = if can_receive {
            self.gathered.clone()
        } else if can_have_order_by {
            select.order_by.clone()
        } else {
            Vec::new()
        };

        let can_pass_on = !is_outermost && !has_group_by && !select.is_distinct;
        let mut columns = select.columns.clone();
        if !self.gathered.is_empty() {
            let gathered = std::mem::take(&mut self.gathered);
            if can_pass_on {
                let declared = select.from.as_deref().map(declared_aliases).unwrap_or_default();
                let (rebound, rebound_columns) = rebind_orderings(&gathered, select.alias, &declared, columns);
                self.prepend(&rebound);
                columns = rebound_columns;
            }
        }

        Ok(SelectExpr {
            columns,
            order_by,
            is_reverse: false,
            ..select
        })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Scalar(_) | Expr::Exists(_) | Expr::InSubquery(_) | Expr::AggregateSubquery(_) => {
                self.isolated(|this| walk_expr(this, expr))
            }
            Expr::SetOperation(set) => self.isolated(|this| {
                let left = this.rewrite_select(&set.left)?;
                this.gathered.clear();
                let right = this.rewrite_select(&set.right)?;
                Ok(Expr::SetOperation(SetOperationExpr {
                    alias: set.alias,
                    kind: set.kind,
                    left: Box::new(left),
                    right: Box::new(right),
                }))
            }),
            Expr::Join(join) => {
                let left = self.rewrite_expr(&join.left)?;
                let left_orderings = std::mem::take(&mut self.gathered);
                let right = self.rewrite_expr(&join.right)?;
                self.prepend(&left_orderings);
                let condition = join.condition.as_deref().map(|c| self.rewrite_expr(c)).transpose()?;
                Ok(Expr::Join(JoinExpr::new(join.kind, left, right, condition)))
            }
            _ => walk_expr(self, expr),
        }
    }
}

/// Re-expresses orderings over `alias`, reusing a column that already
/// computes the ordering expression or adding one. Orderings over aliases
/// outside `declared` are correlated references and stay as they are.
fn rebind_orderings(
    orderings: &[OrderExpr],
    alias: TableAlias,
    declared: &[TableAlias],
    mut columns: Vec<ColumnDeclaration>,
) -> (Vec<OrderExpr>, Vec<ColumnDeclaration>) {
    let mut rebound = Vec::with_capacity(orderings.len());
    for ordering in orderings {
        let column = ordering.expression.as_column();
        if column.is_some_and(|c| !declared.contains(&c.alias)) {
            rebound.push(ordering.clone());
            continue;
        }
        let existing = columns.iter().find(|d| d.expression == ordering.expression);
        let (name, sql_type) = match existing {
            Some(d) => (d.name.clone(), d.sql_type),
            None => {
                let base = column.map(|c| c.name.clone()).unwrap_or_else(|| format!("c{}", columns.len()));
                let name = available_name(&columns, &base);
                let declaration = ColumnDeclaration::new(name.clone(), ordering.expression.clone());
                let sql_type = declaration.sql_type;
                columns.push(declaration);
                (name, sql_type)
            }
        };
        rebound.push(OrderExpr::new(
            ordering.order_type,
            Expr::Column(ColumnExpr::new(alias, name, sql_type)),
        ));
    }
    (rebound, columns)
}

fn available_name(columns: &[ColumnDeclaration], base: &str) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while columns.iter().any(|c| c.name == name) {
        name = format!("{}{}", base, n);
        n += 1;
    }
    name
}
