//! Element operators and sequence predicates.
//!
//! First/Single/Last bind an optional predicate and, for First and Last, a
//! TAKE 1 layer. Any/All/Contains become EXISTS/IN subqueries against remote
//! sequences and plain OR/AND/IN terms against in-memory constant lists.
//!
//! At the root of a query the result must be a sequence: predicates become a
//! FROM-less singleton select, or a COUNT comparison when the dialect cannot
//! select a subquery without a FROM clause.

use log::debug;

use super::{Binder, BinderResult};
use crate::query_compiler::alias::{ParamId, TableAlias};
use crate::query_compiler::operator::QueryOp;
use crate::query_compiler::relation_expr::{
    AggregateExpr, AggregateKind, Aggregator, BinaryOp, ColumnDeclaration, ColumnExpr, Expr, InSubqueryExpr,
    InValuesExpr, Lambda, ProjectionExpr, SelectExpr, SubqueryExpr, Value,
};
use crate::query_compiler::relation_expr::visitors::ExprRewriter;

impl Binder<'_> {
    pub(super) fn bind_element(
        &mut self,
        source: &Expr,
        aggregator: Aggregator,
        predicate: Option<&Lambda>,
        is_root: bool,
    ) -> BinderResult<ProjectionExpr> {
        let mut projection = self.visit_sequence(source)?;
        let where_clause = match predicate {
            Some(p) => Some(self.bind_lambda("Element", p, (*projection.projector).clone())?),
            None => None,
        };
        let take = (!aggregator.is_single()).then(|| Expr::constant(1));
        if take.is_some() || where_clause.is_some() {
            let is_last = aggregator.is_last();
            projection = self.wrap_projection(projection, |select| {
                select
                    .with_where(where_clause)
                    .with_take(take)
                    .with_reverse(is_last)
            });
        }
        if is_root {
            return Ok(projection.with_aggregator(Some(aggregator)));
        }
        Ok(projection)
    }

    pub(super) fn bind_any_all(
        &mut self,
        source: &Expr,
        predicate: Option<&Lambda>,
        is_all: bool,
        is_root: bool,
    ) -> BinderResult<Expr> {
        if let Expr::Constant(Value::List(values)) = source {
            let result = self.bind_constant_any_all(values, predicate, is_all)?;
            return Ok(root_singleton(result, is_root));
        }

        let projection = match predicate {
            Some(p) if is_all => {
                let negated = Lambda {
                    params: p.params.clone(),
                    body: Box::new((*p.body).clone().not()),
                };
                self.bind_where(source, &negated)?
            }
            Some(p) => self.bind_where(source, p)?,
            None => self.visit_sequence(source)?,
        };

        if !is_root {
            let exists = Expr::Exists(SubqueryExpr::new(*projection.select));
            return Ok(if is_all { exists.not() } else { exists });
        }

        if self.ctx.language().allows_subquery_in_select_without_from() {
            let exists = Expr::Exists(SubqueryExpr::new(*projection.select));
            let result = if is_all { exists.not() } else { exists };
            return Ok(Expr::Projection(singleton_sequence(result, Aggregator::SingleOrDefault)));
        }

        // COUNT fallback: Any is `count > 0`, All counts violations, `count = 0`.
        debug!(
            "Binder: {} at root falls back to COUNT for dialect {}",
            if is_all { "All" } else { "Any" },
            self.ctx.language().name()
        );
        let select = (*projection.select).with_columns(vec![ColumnDeclaration::new(
            "value",
            Expr::Aggregate(AggregateExpr {
                kind: AggregateKind::Count,
                argument: None,
                is_distinct: false,
            }),
        )]);
        let count = Expr::column(select.alias, "value", select.columns[0].sql_type);
        let test = if is_all {
            count.eq(Expr::constant(0))
        } else {
            count.gt(Expr::constant(0))
        };
        Ok(Expr::Projection(
            ProjectionExpr::new(select, test).with_aggregator(Some(Aggregator::Single)),
        ))
    }

    fn bind_constant_any_all(
        &mut self,
        values: &[Value],
        predicate: Option<&Lambda>,
        is_all: bool,
    ) -> BinderResult<Expr> {
        let Some(predicate) = predicate else {
            return Ok(Expr::constant(!values.is_empty()));
        };
        let op = if is_all { BinaryOp::And } else { BinaryOp::Or };
        let mut result: Option<Expr> = None;
        for value in values {
            let term = self.bind_lambda("Any", predicate, Expr::Constant(value.clone()))?;
            result = Some(match result {
                Some(acc) => Expr::binary(op, acc, term),
                None => term,
            });
        }
        Ok(result.unwrap_or_else(|| Expr::constant(is_all)))
    }

    pub(super) fn bind_contains(&mut self, source: &Expr, item: &Expr, is_root: bool) -> BinderResult<Expr> {
        if let Expr::Constant(Value::List(values)) = source {
            let item = self.rewrite_expr(item)?;
            let result = Expr::InValues(InValuesExpr {
                expr: Box::new(item),
                values: values.iter().cloned().map(Expr::Constant).collect(),
            });
            return Ok(root_singleton(result, is_root));
        }

        let projection = self.visit_sequence(source)?;
        let single_column = projection.select.columns.len() == 1;
        if !single_column || (is_root && !self.ctx.language().allows_subquery_in_select_without_from()) {
            // Contains(x) == Any(y => y == x)
            let param = ParamId::new();
            let predicate = Lambda {
                params: vec![param],
                body: Box::new(Expr::Parameter(param).eq(item.clone())),
            };
            let any = QueryOp::Any {
                source: Expr::Projection(projection),
                predicate: Some(predicate),
            };
            return self.bind_operator(&any, is_root);
        }

        let item = self.rewrite_expr(item)?;
        let result = Expr::InSubquery(InSubqueryExpr {
            expr: Box::new(item),
            select: projection.select,
        });
        Ok(root_singleton(result, is_root))
    }
}

/// Root predicates are read back from a one-row sequence like any other
/// root scalar.
fn root_singleton(result: Expr, is_root: bool) -> Expr {
    if is_root {
        Expr::Projection(singleton_sequence(result, Aggregator::SingleOrDefault))
    } else {
        result
    }
}

/// `SELECT expr AS value` with no FROM, read back through `aggregator`.
fn singleton_sequence(expr: Expr, aggregator: Aggregator) -> ProjectionExpr {
    let alias = TableAlias::new();
    let column = ColumnDeclaration::new("value", expr);
    let sql_type = column.sql_type;
    ProjectionExpr::new(
        SelectExpr::new(alias, vec![column], None, None),
        Expr::Column(ColumnExpr::new(alias, "value", sql_type)),
    )
    .with_aggregator(Some(aggregator))
}

#[cfg(test)]
mod tests {
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::language::{DialectCapabilities, ProjectionAffinity};
    use crate::query_compiler::operator::builder::{constant_list, new_object, Query};
    use crate::query_compiler::relation_expr::{Aggregator, Expr, Value};
    use crate::query_compiler::test_support::{ctx, ctx_with};

    #[test]
    fn test_first_adds_take_one_and_root_aggregator() {
        let ctx = ctx();
        let query = Query::table("Customers").first();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert_eq!(p.aggregator, Some(Aggregator::First));
        assert_eq!(p.select.take.as_deref(), Some(&Expr::constant(1)));
        assert!(!p.select.is_reverse);
    }

    #[test]
    fn test_last_is_reversed_take() {
        let ctx = ctx();
        let query = Query::table("Customers").last();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert!(p.select.is_reverse);
    }

    #[test]
    fn test_nested_any_is_exists() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .filter(|c| Query::of(c.member("Orders")).any())
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert!(matches!(p.select.where_clause.as_deref(), Some(Expr::Exists(_))));
    }

    #[test]
    fn test_nested_all_is_not_exists_of_negated_predicate() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .filter(|c| Query::of(c.member("Orders")).all(|o| o.member("Freight").gt(Expr::constant(1.0))))
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        let Some(Expr::Unary(not)) = p.select.where_clause.as_deref() else { panic!("expected NOT") };
        let Expr::Exists(exists) = not.operand.as_ref() else { panic!("expected EXISTS") };
        assert!(matches!(exists.select.where_clause.as_deref(), Some(Expr::Unary(_))));
    }

    #[test]
    fn test_root_any_without_from_support_counts() {
        let ctx = ctx_with(DialectCapabilities::access(), ProjectionAffinity::Client);
        let query = Query::table("Customers").any();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert_eq!(p.aggregator, Some(Aggregator::Single));
        assert!(matches!(p.select.columns[0].expression, Expr::Aggregate(_)));
    }

    #[test]
    fn test_root_any_is_singleton_exists() {
        let ctx = ctx();
        let query = Query::table("Customers").any();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert!(p.select.from.is_none());
        assert!(matches!(p.select.columns[0].expression, Expr::Exists(_)));
    }

    #[test]
    fn test_constant_contains_is_in_values() {
        let ctx = ctx();
        let cities = constant_list([Value::from("London"), Value::from("Paris")]);
        let query = Query::table("Customers")
            .filter(|c| Query::of(cities).contains(c.member("City")))
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        assert!(matches!(p.select.where_clause.as_deref(), Some(Expr::InValues(_))));
    }

    #[test]
    fn test_root_constant_contains_is_singleton_sequence() {
        let ctx = ctx();
        let query = Query::of(constant_list([Value::Int(1), Value::Int(2)])).contains(Expr::constant(2));
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!("expected projection") };
        assert_eq!(p.aggregator, Some(Aggregator::SingleOrDefault));
        assert!(p.select.from.is_none());
        assert!(matches!(p.select.columns[0].expression, Expr::InValues(_)));
    }

    #[test]
    fn test_root_constant_any_is_singleton_sequence() {
        let ctx = ctx();
        let query = Query::of(constant_list(Vec::new())).any();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!("expected projection") };
        assert_eq!(p.select.columns[0].expression, Expr::constant(false));
    }

    #[test]
    fn test_constant_any_expands_to_or_chain() {
        let ctx = ctx();
        let ids = constant_list([Value::from("ALFKI"), Value::from("BONAP")]);
        let query = Query::table("Customers")
            .filter(|c| Query::of(ids).any_where(|id| c.member("CustomerID").eq(id)))
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        let Some(Expr::Binary(or)) = p.select.where_clause.as_deref() else { panic!() };
        assert_eq!(or.op, crate::query_compiler::relation_expr::BinaryOp::Or);
    }

    #[test]
    fn test_scalar_contains_is_in_subquery() {
        let ctx = ctx();
        let query = Query::table("Customers")
            .filter(|c| {
                Query::table("Orders")
                    .select(|o| o.member("CustomerID"))
                    .contains(c.member("CustomerID"))
            })
            .select(|c| new_object([("Id", c.member("CustomerID"))]))
            .into_expr();
        let Expr::Projection(p) = bind(&query, &ctx).unwrap() else { panic!() };
        let Some(Expr::Select(inner)) = p.select.from.as_deref() else { panic!() };
        assert!(matches!(inner.where_clause.as_deref(), Some(Expr::InSubquery(_))));
    }
}
