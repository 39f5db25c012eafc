//! GroupBy and aggregate binding.
//!
//! A GroupBy binds its source twice. The first copy carries the GROUP BY;
//! the second is a duplicate of the source, filtered to the rows of one group
//! by a nulls-equal predicate over the key columns, and serves as the
//! group's element subquery. Aggregates over an element subquery are tagged
//! as [`AggregateSubqueryExpr`] so the aggregate rewriter can turn them into
//! columns of the grouped select.

use log::trace;

use super::{Binder, BinderResult, GroupByInfo};
use crate::query_compiler::alias::{next_id, TableAlias};
use crate::query_compiler::duplicator::duplicate;
use crate::query_compiler::operator::QueryOp;
use crate::query_compiler::relation_expr::{
    AggregateExpr, AggregateKind, AggregateSubqueryExpr, Aggregator, ColumnDeclaration, ColumnExpr, Expr,
    GroupingExpr, Lambda, ProjectionExpr, SelectExpr, SubqueryExpr,
};
use crate::query_compiler::relation_expr::visitors::ExprRewriter;

/// `(a1 = b1 OR (a1 IS NULL AND b1 IS NULL)) AND ...`, true when every pair
/// of key components is equal or both null.
pub fn build_predicate_with_nulls_equal(source: &[Expr], target: &[Expr]) -> Option<Expr> {
    source
        .iter()
        .zip(target)
        .map(|(a, b)| {
            a.clone()
                .eq(b.clone())
                .or(a.clone().is_null().and(b.clone().is_null()))
        })
        .reduce(|acc, term| acc.and(term))
}

impl Binder<'_> {
    pub(super) fn bind_group_by(
        &mut self,
        source: &Expr,
        key_selector: &Lambda,
        element_selector: Option<&Lambda>,
        result_selector: Option<&Lambda>,
    ) -> BinderResult<ProjectionExpr> {
        let projection = self.visit_sequence(source)?;
        let key = self.bind_lambda("GroupBy", key_selector, (*projection.projector).clone())?;
        let element = match element_selector {
            Some(selector) => self.bind_lambda("GroupBy", selector, (*projection.projector).clone())?,
            None => (*projection.projector).clone(),
        };

        // Key columns relative to the grouped source become the GROUP BY.
        let key_pc = self.project(&key, projection.select.alias, &[projection.select.alias]);
        let group_exprs: Vec<Expr> = key_pc.columns.iter().map(|c| c.expression.clone()).collect();

        // The element subquery runs over a fresh copy of the source.
        let basis = match duplicate(&Expr::Projection(projection.clone())) {
            Expr::Projection(p) => p,
            other => return Err(super::BinderError::not_a_sequence(&other)),
        };
        let subquery_key = self.bind_lambda("GroupBy", key_selector, (*basis.projector).clone())?;
        let subquery_key_pc = self.project(&subquery_key, basis.select.alias, &[basis.select.alias]);
        let subquery_group_exprs: Vec<Expr> = subquery_key_pc
            .columns
            .iter()
            .map(|c| c.expression.clone())
            .collect();
        let correlation = build_predicate_with_nulls_equal(&subquery_group_exprs, &group_exprs);

        let subquery_element = match element_selector {
            Some(selector) => self.bind_lambda("GroupBy", selector, (*basis.projector).clone())?,
            None => (*basis.projector).clone(),
        };
        let element_alias = TableAlias::new();
        let element_pc = self.project(&subquery_element, element_alias, &[basis.select.alias]);
        let element_subquery = ProjectionExpr::new(
            SelectExpr::new(
                element_alias,
                element_pc.columns,
                Some(Expr::Select(*basis.select)),
                correlation,
            ),
            element_pc.projector,
        );

        let alias = TableAlias::new();
        self.group_by_map.insert(
            element_alias,
            GroupByInfo {
                alias,
                element,
                origin: element_alias,
            },
        );

        let result = match result_selector {
            Some(selector) => {
                let saved = self.current_group_element.replace(element_alias);
                self.map_param("GroupBy", selector, 0, key.clone())?;
                self.map_param("GroupBy", selector, 1, Expr::Projection(element_subquery))?;
                let result = self.rewrite_expr(&selector.body);
                self.current_group_element = saved;
                result?
            }
            None => Expr::Grouping(GroupingExpr {
                key: Box::new(key),
                group: Box::new(Expr::Projection(element_subquery)),
            }),
        };

        let pc = self.project(&result, alias, &[projection.select.alias]);
        trace!(
            "Binder: GroupBy {} over {} with {} key column(s)",
            alias,
            projection.select.alias,
            group_exprs.len()
        );
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Select(*projection.select)), None)
                .with_group_by(group_exprs),
            pc.projector,
        ))
    }

    pub(super) fn bind_aggregate(
        &mut self,
        source: &Expr,
        kind: AggregateKind,
        argument: Option<&Lambda>,
        is_root: bool,
    ) -> BinderResult<Expr> {
        let has_predicate = kind.is_count() && argument.is_some();
        let (source, is_distinct) = self.strip_distinct(source, kind);

        let projection = match (has_predicate, argument) {
            (true, Some(predicate)) => self.bind_where(source, predicate)?,
            _ => self.visit_sequence(source)?,
        };

        let arg_expr = match argument {
            Some(selector) if !has_predicate => {
                Some(self.bind_lambda("Aggregate", selector, (*projection.projector).clone())?)
            }
            _ if !has_predicate && !kind.is_count() => Some((*projection.projector).clone()),
            _ => None,
        };

        let aggregate = Expr::Aggregate(AggregateExpr {
            kind,
            argument: arg_expr.map(Box::new),
            is_distinct,
        });
        let source_alias = projection.select.alias;
        let alias = TableAlias::new();
        let select = SelectExpr::new(
            alias,
            vec![ColumnDeclaration::new("value", aggregate)],
            Some(Expr::Select(*projection.select)),
            None,
        );

        if is_root {
            let sql_type = select.columns[0].sql_type;
            return Ok(Expr::Projection(
                ProjectionExpr::new(select, Expr::Column(ColumnExpr::new(alias, "value", sql_type)))
                    .with_aggregator(Some(Aggregator::Single)),
            ));
        }

        let subquery = SubqueryExpr::new(select);
        let info = match self.group_by_map.get(&source_alias) {
            Some(info) if !has_predicate => info.clone(),
            _ => return Ok(Expr::Scalar(subquery)),
        };

        // Rebind the argument against the group's element so the aggregate is
        // valid as a column of the select that owns the GROUP BY.
        let group_arg = match argument {
            Some(selector) => Some(self.bind_lambda("Aggregate", selector, info.element.clone())?),
            None if !kind.is_count() => Some(info.element.clone()),
            None => None,
        };
        let aggregate_in_group = Expr::Aggregate(AggregateExpr {
            kind,
            argument: group_arg.map(Box::new),
            is_distinct,
        });

        if self.current_group_element == Some(info.origin) {
            return Ok(aggregate_in_group);
        }
        Ok(Expr::AggregateSubquery(AggregateSubqueryExpr {
            correlation_id: next_id(),
            group_by_alias: info.alias,
            aggregate_in_group_select: Box::new(aggregate_in_group),
            subquery,
        }))
    }

    /// `source.Distinct().Sum(..)` aggregates distinct values when the
    /// dialect allows `AGG(DISTINCT x)`. Counts keep the distinct subquery:
    /// there is no argument to carry DISTINCT and a null row still counts.
    fn strip_distinct<'e>(&self, source: &'e Expr, kind: AggregateKind) -> (&'e Expr, bool) {
        if kind.is_count() || !self.ctx.language().allows_distinct_in_aggregates() {
            return (source, false);
        }
        match source {
            Expr::Operator(op) => match op.as_ref() {
                QueryOp::Distinct { source } => (source, true),
                _ => (source, false),
            },
            _ => (source, false),
        }
    }
}
