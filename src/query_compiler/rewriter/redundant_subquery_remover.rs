//! Collapses select layers that add nothing.
//!
//! Two sweeps:
//!
//! 1. A select in a FROM (or directly under a projection) that only forwards
//!    its source's columns under the same names, with no clause of its own,
//!    is removed and references to it are replaced by the forwarded
//!    expressions.
//! 2. A select whose left-most FROM select is a plain column projection
//!    absorbs that select's clauses when doing so cannot change the result
//!    (see [`can_merge_with_from`]).

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use log::trace;

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::compile_ctx::CompileCtx;
use crate::query_compiler::relation_expr::visitors::{
    has_aggregates, infallible, join_conjunction, walk_expr, walk_projection, walk_select, ExprRewriter,
};
use crate::query_compiler::relation_expr::{ClientJoinExpr, Expr, ProjectionExpr, SelectExpr};
use crate::query_compiler::rewriter::errors::Pass;
use crate::query_compiler::rewriter::rewriter_pass::{transformed_if_changed, RewriterPass, RewriterResult};
use crate::query_compiler::transformed::Transformed;

pub struct RedundantSubqueryRemover;

impl RewriterPass for RedundantSubqueryRemover {
    fn pass(&self) -> Pass {
        Pass::RedundantSubqueryRemover
    }

    fn rewrite(&self, expr: Arc<Expr>, _ctx: &mut CompileCtx) -> RewriterResult<Transformed<Arc<Expr>>> {
        let removed = infallible(RedundantLayerRemover.rewrite_expr(&expr));
        let merged = infallible(SubqueryMerger { is_top_level: true }.rewrite_expr(&removed));
        Ok(transformed_if_changed(expr, merged))
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Every column is a bare column of the same name.
fn is_simple_projection(select: &SelectExpr) -> bool {
    select
        .columns
        .iter()
        .all(|d| matches!(&d.expression, Expr::Column(c) if c.name == d.name))
}

/// Columns line up one-to-one, by name, with those of the FROM select.
fn is_name_map_projection(select: &SelectExpr) -> bool {
    let Some(Expr::Select(from)) = select.from.as_deref() else {
        return false;
    };
    select.columns.len() == from.columns.len()
        && select
            .columns
            .iter()
            .zip(&from.columns)
            .all(|(d, f)| matches!(&d.expression, Expr::Column(c) if c.name == f.name))
}

fn is_redundant(select: &SelectExpr) -> bool {
    select.from.is_some()
        && (is_simple_projection(select) || is_name_map_projection(select))
        && select.has_no_clauses()
}

fn is_column_projection(select: &SelectExpr) -> bool {
    select
        .columns
        .iter()
        .all(|d| matches!(d.expression, Expr::Column(_) | Expr::Constant(_)))
}

fn gather_redundant(source: &Expr, found: &mut Vec<SelectExpr>) {
    match source {
        Expr::Select(s) if is_redundant(s) => found.push(s.clone()),
        Expr::Join(j) => {
            gather_redundant(&j.left, found);
            gather_redundant(&j.right, found);
        }
        _ => {}
    }
}

fn left_most_select(source: Option<&Expr>) -> Option<&SelectExpr> {
    match source? {
        Expr::Select(s) => Some(s),
        Expr::Join(j) => left_most_select(Some(&j.left)),
        _ => None,
    }
}

// ============================================================================
// Removal
// ============================================================================

/// Splices selects out of a tree, inlining their column expressions.
struct SubqueryRemover {
    removed: HashSet<TableAlias>,
    columns: HashMap<TableAlias, HashMap<String, Expr>>,
}

impl SubqueryRemover {
    fn new(selects: &[SelectExpr]) -> Self {
        SubqueryRemover {
            removed: selects.iter().map(|s| s.alias).collect(),
            columns: selects
                .iter()
                .map(|s| {
                    let names = s.columns.iter().map(|d| (d.name.clone(), d.expression.clone())).collect();
                    (s.alias, names)
                })
                .collect(),
        }
    }
}

impl ExprRewriter for SubqueryRemover {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            Expr::Column(c) => match self.columns.get(&c.alias).and_then(|names| names.get(&c.name)) {
                Some(replacement) => {
                    let replacement = replacement.clone();
                    self.rewrite_expr(&replacement)
                }
                None => Ok(expr.clone()),
            },
            Expr::Select(s) if self.removed.contains(&s.alias) => match s.from.as_deref() {
                Some(from) => self.rewrite_expr(from),
                None => Ok(expr.clone()),
            },
            _ => walk_expr(self, expr),
        }
    }
}

struct RedundantLayerRemover;

impl ExprRewriter for RedundantLayerRemover {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let select = walk_select(self, select)?;
        let mut redundant = Vec::new();
        if let Some(from) = select.from.as_deref() {
            gather_redundant(from, &mut redundant);
        }
        if redundant.is_empty() {
            return Ok(select);
        }
        trace!(
            "RedundantSubqueryRemover: {} redundant layer(s) under {}",
            redundant.len(),
            select.alias
        );
        SubqueryRemover::new(&redundant).rewrite_select(&select)
    }

    fn rewrite_projection(&mut self, projection: &ProjectionExpr) -> Result<ProjectionExpr, Infallible> {
        let projection = walk_projection(self, projection)?;
        match projection.select.from.as_deref() {
            Some(Expr::Select(from)) if is_redundant(&projection.select) => {
                let mut remover = SubqueryRemover::new(std::slice::from_ref(&projection.select));
                Ok(ProjectionExpr {
                    select: Box::new(remover.rewrite_select(from)?),
                    projector: Box::new(remover.rewrite_expr(&projection.projector)?),
                    aggregator: projection.aggregator,
                })
            }
            _ => Ok(projection),
        }
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        match expr {
            // inner keys name the joined select; it must keep its alias
            Expr::ClientJoin(c) => Ok(Expr::ClientJoin(ClientJoinExpr {
                outer_key: c.outer_key.iter().map(|k| self.rewrite_expr(k)).collect::<Result<_, _>>()?,
                projection: walk_projection(self, &c.projection)?,
                inner_key: c.inner_key.clone(),
            })),
            _ => walk_expr(self, expr),
        }
    }
}

// ============================================================================
// Merging
// ============================================================================

struct SubqueryMerger {
    is_top_level: bool,
}

/// Whether `select` can absorb its left-most FROM select without changing
/// the rows it produces.
fn can_merge_with_from(select: &SelectExpr, is_top_level: bool) -> bool {
    let Some(from) = left_most_select(select.from.as_deref()) else {
        return false;
    };
    // a FROM-less select (a constant seed row) has no source to splice in
    if from.from.is_none() || !is_column_projection(from) {
        return false;
    }
    let sel_has_name_map = is_name_map_projection(select);
    let sel_has_order_by = !select.order_by.is_empty();
    let sel_has_group_by = !select.group_by.is_empty();
    let sel_has_aggregates = has_aggregates(select);
    let sel_has_join = matches!(select.from.as_deref(), Some(Expr::Join(_)));
    let from_has_order_by = !from.order_by.is_empty();
    let from_has_group_by = !from.group_by.is_empty();
    let from_has_aggregates = has_aggregates(from);
    let from_is_paged = from.take.is_some() || from.skip.is_some();

    if sel_has_order_by && from_has_order_by {
        return false;
    }
    if sel_has_group_by && from_has_group_by {
        return false;
    }
    if select.is_reverse || from.is_reverse {
        return false;
    }
    if from_has_order_by && (sel_has_group_by || sel_has_aggregates || select.is_distinct) {
        return false;
    }
    if from_has_group_by {
        return false;
    }
    // paging applies before the outer filter and ordering
    if from_is_paged && (select.where_clause.is_some() || sel_has_order_by) {
        return false;
    }
    if from.take.is_some()
        && (select.take.is_some()
            || select.skip.is_some()
            || select.is_distinct
            || sel_has_aggregates
            || sel_has_group_by
            || sel_has_join)
    {
        return false;
    }
    if from.skip.is_some()
        && (select.skip.is_some() || select.is_distinct || sel_has_aggregates || sel_has_group_by || sel_has_join)
    {
        return false;
    }
    if from.is_distinct
        && (select.take.is_some()
            || select.skip.is_some()
            || !sel_has_name_map
            || sel_has_group_by
            || sel_has_aggregates
            || (sel_has_order_by && !is_top_level)
            || sel_has_join)
    {
        return false;
    }
    if from_has_aggregates
        && (select.take.is_some()
            || select.skip.is_some()
            || select.is_distinct
            || sel_has_aggregates
            || sel_has_group_by
            || sel_has_join)
    {
        return false;
    }
    true
}

fn merge_with_from(select: SelectExpr) -> SelectExpr {
    let Some(from) = left_most_select(select.from.as_deref()).cloned() else {
        return select;
    };
    trace!("RedundantSubqueryRemover: merged {} into {}", from.alias, select.alias);
    let merged = infallible(SubqueryRemover::new(std::slice::from_ref(&from)).rewrite_select(&select));
    let where_clause = join_conjunction(from.where_clause.map(|w| *w).into_iter().chain(merged.where_clause.map(|w| *w)));
    SelectExpr {
        order_by: if merged.order_by.is_empty() { from.order_by } else { merged.order_by },
        group_by: if merged.group_by.is_empty() { from.group_by } else { merged.group_by },
        skip: merged.skip.or(from.skip),
        take: merged.take.or(from.take),
        is_distinct: merged.is_distinct || from.is_distinct,
        where_clause: where_clause.map(Box::new),
        ..merged
    }
}

impl ExprRewriter for SubqueryMerger {
    type Error = Infallible;

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let was_top_level = std::mem::replace(&mut self.is_top_level, false);
        let mut select = walk_select(self, select)?;
        while can_merge_with_from(&select, was_top_level) {
            let merged = merge_with_from(select.clone());
            if merged == select {
                break;
            }
            select = merged;
        }
        Ok(select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::binder::bind;
    use crate::query_compiler::operator::builder::Query;
    use crate::query_compiler::test_support::ctx;

    fn remove(query: Query) -> (bool, ProjectionExpr) {
        let mut ctx = ctx();
        let bound = bind(&query.into_expr(), &ctx).unwrap();
        let out = RedundantSubqueryRemover.rewrite(Arc::new(bound), &mut ctx).unwrap();
        let changed = out.is_yes();
        let Expr::Projection(p) = Arc::unwrap_or_clone(out.get_plan()) else { panic!() };
        (changed, p)
    }

    #[test]
    fn test_forwarding_layer_is_removed() {
        let (changed, p) = remove(Query::table("Customers").filter(|c| c.member("City").eq(Expr::constant("London"))));
        assert!(changed);
        assert!(matches!(p.select.from.as_deref(), Some(Expr::Table(_))));
        assert!(p.select.where_clause.is_some());
    }

    #[test]
    fn test_paging_layers_merge_into_one_select() {
        let (_, p) = remove(
            Query::table("Customers")
                .order_by(|c| c.member("CustomerID"))
                .skip(5)
                .take(10),
        );
        assert!(matches!(p.select.from.as_deref(), Some(Expr::Table(_))));
        assert_eq!(p.select.order_by.len(), 1);
        assert!(p.select.skip.is_some());
        assert!(p.select.take.is_some());
    }

    #[test]
    fn test_default_if_empty_seed_is_not_merged() {
        let (_, p) = remove(
            Query::table("Customers")
                .filter(|c| c.member("City").eq(Expr::constant("Nowhere")))
                .default_if_empty(),
        );
        let Some(Expr::Join(join)) = p.select.from.as_deref() else { panic!("expected seed join") };
        let Expr::Select(seed) = join.left.as_ref() else { panic!("expected seed select") };
        assert!(seed.from.is_none());
        assert_eq!(seed.columns[0].name, "Seed");
    }

    #[test]
    fn test_filter_after_take_keeps_its_own_layer() {
        let (_, p) = remove(
            Query::table("Customers")
                .take(5)
                .filter(|c| c.member("City").eq(Expr::constant("London"))),
        );
        assert!(p.select.where_clause.is_some());
        assert!(p.select.take.is_none());
        let Some(Expr::Select(paged)) = p.select.from.as_deref() else { panic!("expected paged layer") };
        assert!(paged.take.is_some());
    }
}
