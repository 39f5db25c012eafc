//! Structural equality modulo alias renaming.
//!
//! Two relation trees are equal when they have the same shape and every
//! alias declared in the left tree lines up with the alias declared at the
//! same position in the right tree. References to aliases declared outside
//! both trees must match exactly unless a seed mapping says otherwise.

use std::collections::HashMap;

use super::{
    ColumnDeclaration, Expr, JoinExpr, OrderExpr, ProjectionExpr, SelectExpr,
};
use crate::query_compiler::alias::TableAlias;

pub fn are_equal(a: &Expr, b: &Expr) -> bool {
    ExprComparer::default().expr(a, b)
}

/// Compares with an initial alias correspondence, e.g. left-side aliases of
/// two joins that are already known to line up.
pub fn are_equal_with_scope(a: &Expr, b: &Expr, scope: &HashMap<TableAlias, TableAlias>) -> bool {
    ExprComparer {
        aliases: scope.clone(),
    }
    .expr(a, b)
}

#[derive(Default)]
struct ExprComparer {
    aliases: HashMap<TableAlias, TableAlias>,
}

impl ExprComparer {
    fn alias(&self, a: TableAlias, b: TableAlias) -> bool {
        match self.aliases.get(&a) {
            Some(mapped) => *mapped == b,
            None => a == b,
        }
    }

    fn declare(&mut self, a: TableAlias, b: TableAlias) {
        self.aliases.insert(a, b);
    }

    fn opt(&mut self, a: &Option<Box<Expr>>, b: &Option<Box<Expr>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => self.expr(x, y),
            _ => false,
        }
    }

    fn list(&mut self, a: &[Expr], b: &[Expr]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.expr(x, y))
    }

    fn order(&mut self, a: &[OrderExpr], b: &[OrderExpr]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| x.order_type == y.order_type && self.expr(&x.expression, &y.expression))
    }

    fn columns(&mut self, a: &[ColumnDeclaration], b: &[ColumnDeclaration]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| x.name == y.name && self.expr(&x.expression, &y.expression))
    }

    fn select(&mut self, a: &SelectExpr, b: &SelectExpr) -> bool {
        // FROM declares the aliases the other clauses see.
        let from_equal = self.opt(&a.from, &b.from);
        if !from_equal {
            return false;
        }
        let where_equal = self.opt(&a.where_clause, &b.where_clause);
        let result = where_equal
            && self.order(&a.order_by, &b.order_by)
            && self.list(&a.group_by, &b.group_by)
            && self.opt(&a.skip, &b.skip)
            && self.opt(&a.take, &b.take)
            && a.is_distinct == b.is_distinct
            && a.is_reverse == b.is_reverse
            && self.columns(&a.columns, &b.columns);
        if result {
            self.declare(a.alias, b.alias);
        }
        result
    }

    fn join(&mut self, a: &JoinExpr, b: &JoinExpr) -> bool {
        a.kind == b.kind
            && self.expr(&a.left, &b.left)
            && self.expr(&a.right, &b.right)
            && self.opt(&a.condition, &b.condition)
    }

    fn projection(&mut self, a: &ProjectionExpr, b: &ProjectionExpr) -> bool {
        a.aggregator == b.aggregator
            && self.select(&a.select, &b.select)
            && self.expr(&a.projector, &b.projector)
    }

    fn expr(&mut self, a: &Expr, b: &Expr) -> bool {
        match (a, b) {
            (Expr::Table(x), Expr::Table(y)) => {
                let equal = x.name == y.name;
                if equal {
                    self.declare(x.alias, y.alias);
                }
                equal
            }
            (Expr::Column(x), Expr::Column(y)) => x.name == y.name && self.alias(x.alias, y.alias),
            (Expr::Select(x), Expr::Select(y)) => self.select(x, y),
            (Expr::Join(x), Expr::Join(y)) => self.join(x, y),
            (Expr::SetOperation(x), Expr::SetOperation(y)) => {
                let equal = x.kind == y.kind && self.select(&x.left, &y.left) && self.select(&x.right, &y.right);
                if equal {
                    self.declare(x.alias, y.alias);
                }
                equal
            }
            (Expr::Binary(x), Expr::Binary(y)) => {
                x.op == y.op && self.expr(&x.left, &y.left) && self.expr(&x.right, &y.right)
            }
            (Expr::Unary(x), Expr::Unary(y)) => x.op == y.op && self.expr(&x.operand, &y.operand),
            (Expr::Conditional(x), Expr::Conditional(y)) => {
                self.expr(&x.test, &y.test) && self.expr(&x.if_true, &y.if_true) && self.expr(&x.if_false, &y.if_false)
            }
            (Expr::Member(x), Expr::Member(y)) => x.member == y.member && self.expr(&x.expr, &y.expr),
            (Expr::Call(x), Expr::Call(y)) => x.function == y.function && self.list(&x.args, &y.args),
            (Expr::New(x), Expr::New(y)) => {
                x.type_name == y.type_name
                    && x.members.len() == y.members.len()
                    && x
                        .members
                        .iter()
                        .zip(&y.members)
                        .all(|(m, n)| m.name == n.name && self.expr(&m.expr, &n.expr))
            }
            (Expr::Aggregate(x), Expr::Aggregate(y)) => {
                x.kind == y.kind && x.is_distinct == y.is_distinct && self.opt(&x.argument, &y.argument)
            }
            (Expr::AggregateSubquery(x), Expr::AggregateSubquery(y)) => {
                self.alias(x.group_by_alias, y.group_by_alias)
                    && self.expr(&x.aggregate_in_group_select, &y.aggregate_in_group_select)
                    && self.select(&x.subquery.select, &y.subquery.select)
            }
            (Expr::Scalar(x), Expr::Scalar(y)) | (Expr::Exists(x), Expr::Exists(y)) => {
                self.select(&x.select, &y.select)
            }
            (Expr::InSubquery(x), Expr::InSubquery(y)) => self.expr(&x.expr, &y.expr) && self.select(&x.select, &y.select),
            (Expr::InValues(x), Expr::InValues(y)) => self.expr(&x.expr, &y.expr) && self.list(&x.values, &y.values),
            (Expr::IsNull(x), Expr::IsNull(y)) => self.expr(x, y),
            (Expr::Between(x), Expr::Between(y)) => {
                self.expr(&x.expr, &y.expr) && self.expr(&x.lower, &y.lower) && self.expr(&x.upper, &y.upper)
            }
            (Expr::RowNumber(x), Expr::RowNumber(y)) => self.order(&x.order_by, &y.order_by),
            (Expr::Projection(x), Expr::Projection(y)) => self.projection(x, y),
            (Expr::ClientJoin(x), Expr::ClientJoin(y)) => {
                self.list(&x.outer_key, &y.outer_key)
                    && self.projection(&x.projection, &y.projection)
                    && self.list(&x.inner_key, &y.inner_key)
            }
            (Expr::Entity(x), Expr::Entity(y)) => x.entity == y.entity && self.expr(&x.expr, &y.expr),
            (Expr::OuterJoined(x), Expr::OuterJoined(y)) => self.expr(&x.test, &y.test) && self.expr(&x.expr, &y.expr),
            (Expr::Grouping(x), Expr::Grouping(y)) => self.expr(&x.key, &y.key) && self.expr(&x.group, &y.group),
            _ => a == b,
        }
    }
}
