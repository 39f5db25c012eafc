//! # Binder
//!
//! Lowers a declarative operator tree ([`QueryOp`] nodes embedded in
//! [`Expr::Operator`]) into relation nodes.
//!
//! Every sequence operator binds to a [`ProjectionExpr`]: a new
//! [`SelectExpr`] layered over the source's select, plus a client projector
//! over the new select's columns. Lambda parameters are bound by mapping them
//! to the projector of the sequence they range over, then rebinding the body.
//!
//! Module layout:
//! - `joins`: SelectMany / Join / GroupJoin
//! - `grouping`: GroupBy and aggregates
//! - `ordering`: OrderBy / ThenBy
//! - `predicates`: element operators, Any / All / Contains
//! - `set_operations`: Union / Concat / Intersect / Except
//! - `mutation`: Insert / Update / InsertOrUpdate / Delete / Batch

use std::collections::HashMap;

use log::{debug, trace};

use super::alias::{ParamId, TableAlias};
use super::compile_ctx::CompileCtx;
use super::duplicator::duplicate_with_aliases;
use super::operator::QueryOp;
use super::projector::{project_columns, ProjectedColumns};
use super::relation_expr::members::bind_member;
use super::relation_expr::visitors::{walk_expr, ExprRewriter};
use super::relation_expr::{Expr, Lambda, ProjectionExpr, SelectExpr};

pub mod errors;
mod grouping;
mod joins;
mod mutation;
mod ordering;
mod predicates;
mod set_operations;

pub use errors::BinderError;
pub use grouping::build_predicate_with_nulls_equal;

pub type BinderResult<T> = Result<T, BinderError>;

/// Binds `op` as the root of a query. Root position matters for element
/// operators, aggregates and Any/All/Contains, which only attach an
/// aggregator (or a FROM-less singleton select) when they are the root.
pub fn bind(op: &Expr, ctx: &CompileCtx) -> BinderResult<Expr> {
    let mut binder = Binder::new(ctx);
    let bound = match op {
        Expr::Operator(op) => binder.bind_operator(op, true)?,
        other => binder.rewrite_expr(other)?,
    };
    debug!("Binder: bound root to {}", bound);
    Ok(bound)
}

/// Aggregates over a group's element subquery are tied back to the select
/// that owns the GROUP BY through this record.
#[derive(Debug, Clone)]
pub(crate) struct GroupByInfo {
    /// Alias of the select carrying the GROUP BY.
    pub alias: TableAlias,
    /// Element expression over the grouped select's source.
    pub element: Expr,
    /// Alias the element subquery was first registered under.
    pub origin: TableAlias,
}

pub(crate) struct Binder<'a> {
    ctx: &'a CompileCtx,
    map: HashMap<ParamId, Expr>,
    group_by_map: HashMap<TableAlias, GroupByInfo>,
    current_group_element: Option<TableAlias>,
    then_bys: Vec<(Lambda, super::relation_expr::OrderType)>,
}

impl<'a> Binder<'a> {
    fn new(ctx: &'a CompileCtx) -> Self {
        Binder {
            ctx,
            map: HashMap::new(),
            group_by_map: HashMap::new(),
            current_group_element: None,
            then_bys: Vec::new(),
        }
    }

    fn bind_operator(&mut self, op: &QueryOp, is_root: bool) -> BinderResult<Expr> {
        trace!("Binder: {} (root: {})", op.name(), is_root);
        match op {
            QueryOp::Table { entity } => {
                let projection = self.ctx.mapper().bind_table(self.ctx.language(), entity)?;
                Ok(Expr::Projection(projection))
            }
            QueryOp::Where { source, predicate } => self.bind_where(source, predicate).map(Expr::Projection),
            QueryOp::Select { source, selector } => self.bind_select(source, selector).map(Expr::Projection),
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => self
                .bind_select_many(source, collection, result.as_ref())
                .map(Expr::Projection),
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self
                .bind_join(outer, inner, outer_key, inner_key, result)
                .map(Expr::Projection),
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self
                .bind_group_join(outer, inner, outer_key, inner_key, result)
                .map(Expr::Projection),
            QueryOp::OrderBy {
                source,
                key,
                order_type,
            } => self.bind_order_by(source, key, *order_type).map(Expr::Projection),
            QueryOp::ThenBy {
                source,
                key,
                order_type,
            } => self.bind_then_by(source, key, *order_type),
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => self
                .bind_group_by(source, key, element.as_ref(), result.as_ref())
                .map(Expr::Projection),
            QueryOp::Distinct { source } => self
                .bind_layer(source, |select| select.with_distinct(true))
                .map(Expr::Projection),
            QueryOp::Take { source, count } => {
                let count = self.rewrite_expr(count)?;
                self.bind_layer(source, |select| select.with_take(Some(count)))
                    .map(Expr::Projection)
            }
            QueryOp::Skip { source, count } => {
                let count = self.rewrite_expr(count)?;
                self.bind_layer(source, |select| select.with_skip(Some(count)))
                    .map(Expr::Projection)
            }
            QueryOp::Reverse { source } => self
                .bind_layer(source, |select| select.with_reverse(true))
                .map(Expr::Projection),
            QueryOp::Cast { source, type_name } => {
                trace!("Binder: Cast to {} leaves the projection unchanged", type_name);
                self.visit_sequence(source).map(Expr::Projection)
            }
            QueryOp::DefaultIfEmpty { source } => self.bind_default_if_empty(source).map(Expr::Projection),
            QueryOp::Element {
                source,
                aggregator,
                predicate,
            } => self
                .bind_element(source, *aggregator, predicate.as_ref(), is_root)
                .map(Expr::Projection),
            QueryOp::Aggregate {
                source,
                kind,
                argument,
            } => self.bind_aggregate(source, *kind, argument.as_ref(), is_root),
            QueryOp::Any { source, predicate } => self.bind_any_all(source, predicate.as_ref(), false, is_root),
            QueryOp::All { source, predicate } => self.bind_any_all(source, Some(predicate), true, is_root),
            QueryOp::Contains { source, item } => self.bind_contains(source, item, is_root),
            QueryOp::SetOperation { kind, left, right } => self.bind_set_operation(*kind, left, right),
            QueryOp::Insert { entity, instance } => self.bind_insert(entity, instance),
            QueryOp::Update {
                entity,
                instance,
                check,
            } => self.bind_update(entity, instance, check.as_ref()),
            QueryOp::InsertOrUpdate {
                entity,
                instance,
                check,
            } => self.bind_insert_or_update(entity, instance, check.as_ref()),
            QueryOp::Delete {
                entity,
                instance,
                predicate,
            } => self.bind_delete(entity, instance.as_ref(), predicate.as_ref()),
            QueryOp::Batch { items, operation } => self.bind_batch(items, operation),
        }
    }

    // ------------------------------------------------------------------
    // Helpers shared by the operator modules
    // ------------------------------------------------------------------

    fn project(&self, expr: &Expr, new_alias: TableAlias, sources: &[TableAlias]) -> ProjectedColumns {
        project_columns(self.ctx.language(), self.ctx.affinity(), expr, &[], new_alias, sources)
    }

    /// Maps the `index`-th parameter of `lambda` to `bound`.
    fn map_param(
        &mut self,
        operator: &'static str,
        lambda: &Lambda,
        index: usize,
        bound: Expr,
    ) -> BinderResult<()> {
        let param = lambda.param(index).ok_or(BinderError::LambdaArity {
            operator,
            expected: index + 1,
        })?;
        self.map.insert(param, bound);
        Ok(())
    }

    /// Binds a lambda body after mapping its first parameter to `bound`.
    fn bind_lambda(&mut self, operator: &'static str, lambda: &Lambda, bound: Expr) -> BinderResult<Expr> {
        self.map_param(operator, lambda, 0, bound)?;
        self.rewrite_expr(&lambda.body)
    }

    /// Every use of a parameter bound to something that declares relations
    /// gets its own copy, so no alias is declared twice in one tree.
    fn resolve_param(&mut self, param: ParamId) -> Option<Expr> {
        let bound = self.map.get(&param)?.clone();
        let (copy, aliases) = duplicate_with_aliases(&bound);
        for (old, new) in aliases {
            if let Some(info) = self.group_by_map.get(&old).cloned() {
                self.group_by_map.insert(new, info);
            }
        }
        Some(copy)
    }

    fn visit_sequence(&mut self, expr: &Expr) -> BinderResult<ProjectionExpr> {
        let bound = self.rewrite_expr(expr)?;
        self.convert_to_sequence(bound)
    }

    fn convert_to_sequence(&mut self, expr: Expr) -> BinderResult<ProjectionExpr> {
        match expr {
            Expr::Projection(projection) => Ok(projection),
            Expr::Grouping(grouping) => self.convert_to_sequence(*grouping.group),
            Expr::OuterJoined(outer) => self.convert_to_sequence(*outer.expr),
            Expr::Member(ref access) => match access.expr.as_ref() {
                Expr::Entity(entity) if self.ctx.mapper().is_relationship(&entity.entity, &access.member) => {
                    let bound = self.ctx.mapper().bind_member(
                        self.ctx.language(),
                        &access.expr,
                        &entity.entity,
                        &access.member,
                    )?;
                    self.convert_to_sequence(bound)
                }
                _ => Err(BinderError::not_a_sequence(&expr)),
            },
            other => Err(BinderError::not_a_sequence(&other)),
        }
    }

    /// A new select over `projection` with the same projector.
    fn wrap_projection(
        &self,
        projection: ProjectionExpr,
        configure: impl FnOnce(SelectExpr) -> SelectExpr,
    ) -> ProjectionExpr {
        let alias = TableAlias::new();
        let pc = self.project(&projection.projector, alias, &[projection.select.alias]);
        let select = SelectExpr::new(alias, pc.columns, Some(Expr::Select(*projection.select)), None);
        ProjectionExpr::new(configure(select), pc.projector)
    }

    // ------------------------------------------------------------------
    // Single-source operators
    // ------------------------------------------------------------------

    fn bind_layer(
        &mut self,
        source: &Expr,
        configure: impl FnOnce(SelectExpr) -> SelectExpr,
    ) -> BinderResult<ProjectionExpr> {
        let projection = self.visit_sequence(source)?;
        Ok(self.wrap_projection(projection, configure))
    }

    pub(super) fn bind_where(&mut self, source: &Expr, predicate: &Lambda) -> BinderResult<ProjectionExpr> {
        let projection = self.visit_sequence(source)?;
        let where_clause = self.bind_lambda("Where", predicate, (*projection.projector).clone())?;
        Ok(self.wrap_projection(projection, |select| select.with_where(Some(where_clause))))
    }

    fn bind_select(&mut self, source: &Expr, selector: &Lambda) -> BinderResult<ProjectionExpr> {
        let projection = self.visit_sequence(source)?;
        let body = self.bind_lambda("Select", selector, (*projection.projector).clone())?;
        let alias = TableAlias::new();
        let pc = self.project(&body, alias, &[projection.select.alias]);
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Select(*projection.select)), None),
            pc.projector,
        ))
    }

    /// Outside SelectMany, a sequence that yields one default row when empty:
    /// a single constant row outer-applied to the source.
    fn bind_default_if_empty(&mut self, source: &Expr) -> BinderResult<ProjectionExpr> {
        use super::relation_expr::{ColumnDeclaration, JoinExpr, JoinKind};

        let projection = self.visit_sequence(source)?;
        let projection = self.ctx.language().add_outer_join_test(projection);
        let seed = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Seed", Expr::constant(1))],
            None,
            None,
        );
        let right_alias = projection.select.alias;
        let join = JoinExpr::new(
            JoinKind::OuterApply,
            Expr::Select(seed),
            Expr::Select(*projection.select),
            None,
        );
        let alias = TableAlias::new();
        let pc = self.project(&projection.projector, alias, &[right_alias]);
        Ok(ProjectionExpr::new(
            SelectExpr::new(alias, pc.columns, Some(Expr::Join(join)), None),
            pc.projector,
        ))
    }
}

impl ExprRewriter for Binder<'_> {
    type Error = BinderError;

    fn rewrite_expr(&mut self, expr: &Expr) -> BinderResult<Expr> {
        match expr {
            Expr::Operator(op) => self.bind_operator(op, false),
            Expr::Parameter(p) => Ok(self.resolve_param(*p).unwrap_or_else(|| expr.clone())),
            Expr::Member(access) => {
                let source = self.rewrite_expr(&access.expr)?;
                Ok(bind_member(&source, &access.member))
            }
            _ => walk_expr(self, expr),
        }
    }
}
