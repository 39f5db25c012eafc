//! Expands `==` / `!=` between entities and constructed objects.
//!
//! - An outer-joined value compared with `null` tests the join's marker
//!   column, since key columns of an unmatched row can still be non-null.
//! - Entities compare on their primary key members.
//! - `new { .. }` shapes compare member by member and must assign the same
//!   member names on both sides.

use std::collections::HashSet;
use std::sync::Arc;

use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::members::bind_member;
use crate::query_compiler::relation_expr::visitors::{join_conjunction, walk_expr, ExprRewriter};
use crate::query_compiler::relation_expr::{BinaryOp, Expr};
use crate::query_compiler::rewriter::errors::{Pass, RewriterError};
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct EntityComparisonRewriter;

impl RewriterPass for EntityComparisonRewriter {
    fn pass(&self) -> Pass {
        Pass::EntityComparison
    }

    fn rewrite(&self, expr: Arc<Expr>, ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let mut rewriter = ComparisonExpander { ctx: &*ctx };
        let output = rewriter.rewrite_expr(&expr)?;
        Ok(transformed_if_changed(expr, output))
    }
}

struct ComparisonExpander<'a> {
    ctx: &'a CompileCtx,
}

impl ComparisonExpander<'_> {
    /// `None` when neither side needs expanding.
    fn expand(&self, left: &Expr, right: &Expr, negate: bool) -> RewriterResult<Option<Expr>> {
        match (left, right) {
            (Expr::OuterJoined(outer), other) | (other, Expr::OuterJoined(outer)) if other.is_null_constant() => {
                let test = (*outer.test).clone().is_null();
                return Ok(Some(if negate { test.not() } else { test }));
            }
            _ => {}
        }

        if let Some(entity) = entity_name(left).or_else(|| entity_name(right)) {
            let keys = self
                .ctx
                .mapper()
                .primary_key_members(entity)
                .map_err(|source| RewriterError::Mapping {
                    pass: Pass::EntityComparison,
                    source,
                })?;
            return Ok(Some(member_predicate(left, right, &keys, negate)));
        }

        match (defined_members(left), defined_members(right)) {
            (None, None) => Ok(None),
            (Some(l), Some(r)) => {
                let ls: HashSet<&String> = l.iter().collect();
                let rs: HashSet<&String> = r.iter().collect();
                if ls != rs {
                    return Err(RewriterError::IncomparableConstructedTypes {
                        pass: Pass::EntityComparison,
                        left: l.join(", "),
                        right: r.join(", "),
                    });
                }
                Ok(Some(member_predicate(left, right, &l, negate)))
            }
            (Some(members), None) | (None, Some(members)) => Ok(Some(member_predicate(left, right, &members, negate))),
        }
    }
}

impl ExprRewriter for ComparisonExpander<'_> {
    type Error = RewriterError;

    fn rewrite_expr(&mut self, expr: &Expr) -> RewriterResult<Expr> {
        if let Expr::Binary(b) = expr {
            if matches!(b.op, BinaryOp::Eq | BinaryOp::NotEq) {
                if let Some(expanded) = self.expand(&b.left, &b.right, b.op == BinaryOp::NotEq)? {
                    return self.rewrite_expr(&expanded);
                }
            }
        }
        walk_expr(self, expr)
    }
}

fn entity_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Entity(e) => Some(&e.entity),
        Expr::OuterJoined(o) => match o.expr.as_ref() {
            Expr::Entity(e) => Some(&e.entity),
            _ => None,
        },
        _ => None,
    }
}

fn defined_members(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::New(n) => Some(n.members.iter().map(|m| m.name.clone()).collect()),
        _ => None,
    }
}

/// AND of per-member equality, negated as a whole for `!=`. Members bound to
/// a null constant on one side become a null test of the other side.
fn member_predicate(left: &Expr, right: &Expr, members: &[String], negate: bool) -> Expr {
    let terms = members.iter().map(|m| {
        let l = bind_member(left, m);
        let r = bind_member(right, m);
        if r.is_null_constant() {
            l.is_null()
        } else if l.is_null_constant() {
            r.is_null()
        } else {
            l.eq(r)
        }
    });
    let predicate = join_conjunction(terms).unwrap_or_else(|| Expr::constant(true));
    if negate {
        predicate.not()
    } else {
        predicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::alias::TableAlias;
    use crate::query_compiler::operator::builder::new_object;
    use crate::query_compiler::relation_expr::{EntityExpr, MemberBinding, NewExpr, OuterJoinedExpr, SqlType};
    use crate::query_compiler::test_support::ctx;

    fn customer(alias: TableAlias) -> Expr {
        let columns = ["CustomerID", "CompanyName", "City"];
        Expr::Entity(EntityExpr {
            entity: "Customer".to_string(),
            expr: Box::new(Expr::New(NewExpr {
                type_name: Some("Customer".to_string()),
                members: columns
                    .iter()
                    .map(|c| MemberBinding {
                        name: c.to_string(),
                        expr: Expr::column(alias, *c, SqlType::Text),
                    })
                    .collect(),
            })),
        })
    }

    fn rewrite(expr: Expr) -> RewriterResult<Expr> {
        let mut ctx = ctx();
        EntityComparisonRewriter
            .rewrite(Arc::new(expr), &mut ctx)
            .map(|t| Arc::unwrap_or_clone(t.get_plan()))
    }

    #[test]
    fn test_outer_joined_null_check_uses_test_column() {
        let a = TableAlias::new();
        let test = Expr::column(a, "Test", SqlType::Int);
        let joined = Expr::OuterJoined(OuterJoinedExpr {
            test: Box::new(test.clone()),
            expr: Box::new(customer(a)),
        });
        assert_eq!(rewrite(joined.clone().eq(Expr::null())).unwrap(), test.clone().is_null());
        assert_eq!(rewrite(Expr::null().ne(joined)).unwrap(), test.is_null().not());
    }

    #[test]
    fn test_entities_compare_on_primary_key() {
        let a = TableAlias::new();
        let b = TableAlias::new();
        let out = rewrite(customer(a).eq(customer(b))).unwrap();
        assert_eq!(
            out,
            Expr::column(a, "CustomerID", SqlType::Text).eq(Expr::column(b, "CustomerID", SqlType::Text))
        );
    }

    #[test]
    fn test_entity_against_null_tests_key_columns() {
        let a = TableAlias::new();
        let out = rewrite(customer(a).eq(Expr::null())).unwrap();
        assert_eq!(out, Expr::column(a, "CustomerID", SqlType::Text).is_null());
    }

    #[test]
    fn test_constructed_types_compare_member_wise() {
        let a = TableAlias::new();
        let left = new_object([("X", Expr::column(a, "X", SqlType::Int)), ("Y", Expr::column(a, "Y", SqlType::Int))]);
        let right = new_object([("Y", Expr::constant(2)), ("X", Expr::constant(1))]);
        let out = rewrite(left.ne(right)).unwrap();
        let expected = Expr::column(a, "X", SqlType::Int)
            .eq(Expr::constant(1))
            .and(Expr::column(a, "Y", SqlType::Int).eq(Expr::constant(2)))
            .not();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_mismatched_constructed_types_fail() {
        let left = new_object([("X", Expr::constant(1))]);
        let right = new_object([("Y", Expr::constant(1))]);
        assert!(matches!(
            rewrite(left.eq(right)),
            Err(RewriterError::IncomparableConstructedTypes { .. })
        ));
    }

    #[test]
    fn test_scalar_comparison_is_untouched() {
        let a = TableAlias::new();
        let expr = Expr::column(a, "City", SqlType::Text).eq(Expr::constant("London"));
        let mut ctx = ctx();
        let out = EntityComparisonRewriter.rewrite(Arc::new(expr), &mut ctx).unwrap();
        assert!(!out.is_yes());
    }
}
