//! Expression Visitor Pattern
//!
//! Two traits share one traversal order:
//!
//! - [`ExprVisitor`] walks a tree read-only (gatherers, scope checks).
//! - [`ExprRewriter`] rebuilds a tree bottom-up; passes override the node
//!   kinds they care about and fall back to [`walk_expr`] for the rest.
//!
//! Selects embedded in other nodes (subqueries, projections, set operation
//! sides) always go through `visit_select` / `rewrite_select`, so a pass that
//! handles selects sees every select in the tree.
//!
//! A select's parts are walked FROM first, then WHERE, ORDER BY, GROUP BY,
//! SKIP, TAKE and finally the column list.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use super::{
    AggregateExpr, AggregateSubqueryExpr, BetweenExpr, BinaryExpr, ClientJoinExpr, ColumnAssignment,
    ColumnDeclaration, ColumnExpr, CommandExpr, ConditionalExpr, EntityExpr, Expr, FunctionCall,
    GroupingExpr, InSubqueryExpr, InValuesExpr, JoinExpr, Lambda, MemberAccess, MemberBinding,
    NewExpr, OrderExpr, OuterJoinedExpr, ProjectionExpr, RowNumberExpr, SelectExpr,
    SetOperationExpr, SubqueryExpr, UnaryExpr,
};
use crate::query_compiler::alias::TableAlias;

/// Unwraps the result of a rewriter that cannot fail.
pub fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

// ============================================================================
// Read-only traversal
// ============================================================================

pub trait ExprVisitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr_ref(self, expr)
    }

    fn visit_select(&mut self, select: &SelectExpr) {
        walk_select_ref(self, select)
    }

    fn visit_projection(&mut self, projection: &ProjectionExpr) {
        walk_projection_ref(self, projection)
    }
}

pub fn walk_expr_ref<V: ExprVisitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Constant(_) | Expr::Parameter(_) | Expr::Table(_) | Expr::Column(_) | Expr::Operator(_) => {}
        Expr::Member(m) => v.visit_expr(&m.expr),
        Expr::Binary(b) => {
            v.visit_expr(&b.left);
            v.visit_expr(&b.right);
        }
        Expr::Unary(u) => v.visit_expr(&u.operand),
        Expr::Conditional(c) => {
            v.visit_expr(&c.test);
            v.visit_expr(&c.if_true);
            v.visit_expr(&c.if_false);
        }
        Expr::Call(c) => c.args.iter().for_each(|a| v.visit_expr(a)),
        Expr::New(n) => n.members.iter().for_each(|m| v.visit_expr(&m.expr)),
        Expr::Lambda(l) => v.visit_expr(&l.body),
        Expr::Select(s) => v.visit_select(s),
        Expr::Join(j) => {
            v.visit_expr(&j.left);
            v.visit_expr(&j.right);
            if let Some(c) = &j.condition {
                v.visit_expr(c);
            }
        }
        Expr::SetOperation(s) => {
            v.visit_select(&s.left);
            v.visit_select(&s.right);
        }
        Expr::Aggregate(a) => {
            if let Some(arg) = &a.argument {
                v.visit_expr(arg);
            }
        }
        Expr::AggregateSubquery(a) => {
            v.visit_expr(&a.aggregate_in_group_select);
            v.visit_select(&a.subquery.select);
        }
        Expr::Scalar(s) | Expr::Exists(s) => v.visit_select(&s.select),
        Expr::InSubquery(i) => {
            v.visit_expr(&i.expr);
            v.visit_select(&i.select);
        }
        Expr::InValues(i) => {
            v.visit_expr(&i.expr);
            i.values.iter().for_each(|e| v.visit_expr(e));
        }
        Expr::IsNull(e) => v.visit_expr(e),
        Expr::Between(b) => {
            v.visit_expr(&b.expr);
            v.visit_expr(&b.lower);
            v.visit_expr(&b.upper);
        }
        Expr::RowNumber(r) => r.order_by.iter().for_each(|o| v.visit_expr(&o.expression)),
        Expr::Projection(p) => v.visit_projection(p),
        Expr::ClientJoin(c) => {
            c.outer_key.iter().for_each(|k| v.visit_expr(k));
            v.visit_projection(&c.projection);
            c.inner_key.iter().for_each(|k| v.visit_expr(k));
        }
        Expr::Entity(e) => v.visit_expr(&e.expr),
        Expr::OuterJoined(o) => {
            v.visit_expr(&o.test);
            v.visit_expr(&o.expr);
        }
        Expr::Grouping(g) => {
            v.visit_expr(&g.key);
            v.visit_expr(&g.group);
        }
        Expr::Command(c) => walk_command_ref(v, c),
    }
}

pub fn walk_select_ref<V: ExprVisitor + ?Sized>(v: &mut V, select: &SelectExpr) {
    if let Some(from) = &select.from {
        v.visit_expr(from);
    }
    if let Some(w) = &select.where_clause {
        v.visit_expr(w);
    }
    select.order_by.iter().for_each(|o| v.visit_expr(&o.expression));
    select.group_by.iter().for_each(|g| v.visit_expr(g));
    if let Some(s) = &select.skip {
        v.visit_expr(s);
    }
    if let Some(t) = &select.take {
        v.visit_expr(t);
    }
    select.columns.iter().for_each(|c| v.visit_expr(&c.expression));
}

pub fn walk_projection_ref<V: ExprVisitor + ?Sized>(v: &mut V, projection: &ProjectionExpr) {
    v.visit_select(&projection.select);
    v.visit_expr(&projection.projector);
}

fn walk_command_ref<V: ExprVisitor + ?Sized>(v: &mut V, command: &CommandExpr) {
    match command {
        CommandExpr::Insert { assignments, .. } => assignments.iter().for_each(|a| v.visit_expr(&a.expression)),
        CommandExpr::Update {
            where_clause,
            assignments,
            ..
        } => {
            v.visit_expr(where_clause);
            assignments.iter().for_each(|a| v.visit_expr(&a.expression));
        }
        CommandExpr::Delete { where_clause, .. } => {
            if let Some(w) = where_clause {
                v.visit_expr(w);
            }
        }
        CommandExpr::If {
            check,
            if_true,
            if_false,
        } => {
            v.visit_expr(check);
            walk_command_ref(v, if_true);
            if let Some(f) = if_false {
                walk_command_ref(v, f);
            }
        }
        CommandExpr::Batch { items, operation, .. } => {
            items.iter().for_each(|i| v.visit_expr(i));
            walk_command_ref(v, operation);
        }
    }
}

// ============================================================================
// Rebuilding traversal
// ============================================================================

pub trait ExprRewriter {
    type Error;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        walk_expr(self, expr)
    }

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Self::Error> {
        walk_select(self, select)
    }

    fn rewrite_projection(&mut self, projection: &ProjectionExpr) -> Result<ProjectionExpr, Self::Error> {
        walk_projection(self, projection)
    }
}

fn bx(e: Expr) -> Box<Expr> {
    Box::new(e)
}

fn rewrite_all<R: ExprRewriter + ?Sized>(r: &mut R, exprs: &[Expr]) -> Result<Vec<Expr>, R::Error> {
    exprs.iter().map(|e| r.rewrite_expr(e)).collect()
}

fn rewrite_opt<R: ExprRewriter + ?Sized>(
    r: &mut R,
    expr: &Option<Box<Expr>>,
) -> Result<Option<Box<Expr>>, R::Error> {
    expr.as_ref().map(|e| r.rewrite_expr(e).map(bx)).transpose()
}

pub fn rewrite_order_by<R: ExprRewriter + ?Sized>(
    r: &mut R,
    order_by: &[OrderExpr],
) -> Result<Vec<OrderExpr>, R::Error> {
    order_by
        .iter()
        .map(|o| {
            Ok(OrderExpr {
                order_type: o.order_type,
                expression: r.rewrite_expr(&o.expression)?,
            })
        })
        .collect()
}

pub fn rewrite_columns<R: ExprRewriter + ?Sized>(
    r: &mut R,
    columns: &[ColumnDeclaration],
) -> Result<Vec<ColumnDeclaration>, R::Error> {
    columns
        .iter()
        .map(|c| {
            Ok(ColumnDeclaration {
                name: c.name.clone(),
                expression: r.rewrite_expr(&c.expression)?,
                sql_type: c.sql_type,
            })
        })
        .collect()
}

pub fn walk_expr<R: ExprRewriter + ?Sized>(r: &mut R, expr: &Expr) -> Result<Expr, R::Error> {
    Ok(match expr {
        Expr::Constant(_) | Expr::Parameter(_) | Expr::Table(_) | Expr::Column(_) | Expr::Operator(_) => {
            expr.clone()
        }
        Expr::Member(m) => Expr::Member(MemberAccess {
            expr: bx(r.rewrite_expr(&m.expr)?),
            member: m.member.clone(),
        }),
        Expr::Binary(b) => Expr::Binary(BinaryExpr {
            op: b.op,
            left: bx(r.rewrite_expr(&b.left)?),
            right: bx(r.rewrite_expr(&b.right)?),
        }),
        Expr::Unary(u) => Expr::Unary(UnaryExpr {
            op: u.op,
            operand: bx(r.rewrite_expr(&u.operand)?),
        }),
        Expr::Conditional(c) => Expr::Conditional(ConditionalExpr {
            test: bx(r.rewrite_expr(&c.test)?),
            if_true: bx(r.rewrite_expr(&c.if_true)?),
            if_false: bx(r.rewrite_expr(&c.if_false)?),
        }),
        Expr::Call(c) => Expr::Call(FunctionCall {
            function: c.function.clone(),
            args: rewrite_all(r, &c.args)?,
        }),
        Expr::New(n) => Expr::New(NewExpr {
            type_name: n.type_name.clone(),
            members: n
                .members
                .iter()
                .map(|m| {
                    Ok(MemberBinding {
                        name: m.name.clone(),
                        expr: r.rewrite_expr(&m.expr)?,
                    })
                })
                .collect::<Result<_, _>>()?,
        }),
        Expr::Lambda(l) => Expr::Lambda(Lambda {
            params: l.params.clone(),
            body: bx(r.rewrite_expr(&l.body)?),
        }),
        Expr::Select(s) => Expr::Select(r.rewrite_select(s)?),
        Expr::Join(j) => Expr::Join(JoinExpr {
            kind: j.kind,
            left: bx(r.rewrite_expr(&j.left)?),
            right: bx(r.rewrite_expr(&j.right)?),
            condition: rewrite_opt(r, &j.condition)?,
        }),
        Expr::SetOperation(s) => Expr::SetOperation(SetOperationExpr {
            alias: s.alias,
            kind: s.kind,
            left: Box::new(r.rewrite_select(&s.left)?),
            right: Box::new(r.rewrite_select(&s.right)?),
        }),
        Expr::Aggregate(a) => Expr::Aggregate(AggregateExpr {
            kind: a.kind,
            argument: rewrite_opt(r, &a.argument)?,
            is_distinct: a.is_distinct,
        }),
        Expr::AggregateSubquery(a) => Expr::AggregateSubquery(AggregateSubqueryExpr {
            correlation_id: a.correlation_id,
            group_by_alias: a.group_by_alias,
            aggregate_in_group_select: bx(r.rewrite_expr(&a.aggregate_in_group_select)?),
            subquery: SubqueryExpr::new(r.rewrite_select(&a.subquery.select)?),
        }),
        Expr::Scalar(s) => Expr::Scalar(SubqueryExpr::new(r.rewrite_select(&s.select)?)),
        Expr::Exists(s) => Expr::Exists(SubqueryExpr::new(r.rewrite_select(&s.select)?)),
        Expr::InSubquery(i) => Expr::InSubquery(InSubqueryExpr {
            expr: bx(r.rewrite_expr(&i.expr)?),
            select: Box::new(r.rewrite_select(&i.select)?),
        }),
        Expr::InValues(i) => Expr::InValues(InValuesExpr {
            expr: bx(r.rewrite_expr(&i.expr)?),
            values: rewrite_all(r, &i.values)?,
        }),
        Expr::IsNull(e) => Expr::IsNull(bx(r.rewrite_expr(e)?)),
        Expr::Between(b) => Expr::Between(BetweenExpr {
            expr: bx(r.rewrite_expr(&b.expr)?),
            lower: bx(r.rewrite_expr(&b.lower)?),
            upper: bx(r.rewrite_expr(&b.upper)?),
        }),
        Expr::RowNumber(rn) => Expr::RowNumber(RowNumberExpr {
            order_by: rewrite_order_by(r, &rn.order_by)?,
        }),
        Expr::Projection(p) => Expr::Projection(r.rewrite_projection(p)?),
        Expr::ClientJoin(c) => {
            let outer_key = rewrite_all(r, &c.outer_key)?;
            let projection = r.rewrite_projection(&c.projection)?;
            let inner_key = rewrite_all(r, &c.inner_key)?;
            Expr::ClientJoin(ClientJoinExpr {
                projection,
                outer_key,
                inner_key,
            })
        }
        Expr::Entity(e) => Expr::Entity(EntityExpr {
            entity: e.entity.clone(),
            expr: bx(r.rewrite_expr(&e.expr)?),
        }),
        Expr::OuterJoined(o) => Expr::OuterJoined(OuterJoinedExpr {
            test: bx(r.rewrite_expr(&o.test)?),
            expr: bx(r.rewrite_expr(&o.expr)?),
        }),
        Expr::Grouping(g) => Expr::Grouping(GroupingExpr {
            key: bx(r.rewrite_expr(&g.key)?),
            group: bx(r.rewrite_expr(&g.group)?),
        }),
        Expr::Command(c) => Expr::Command(walk_command(r, c)?),
    })
}

pub fn walk_select<R: ExprRewriter + ?Sized>(r: &mut R, select: &SelectExpr) -> Result<SelectExpr, R::Error> {
    let from = rewrite_opt(r, &select.from)?;
    let where_clause = rewrite_opt(r, &select.where_clause)?;
    let order_by = rewrite_order_by(r, &select.order_by)?;
    let group_by = rewrite_all(r, &select.group_by)?;
    let skip = rewrite_opt(r, &select.skip)?;
    let take = rewrite_opt(r, &select.take)?;
    let columns = rewrite_columns(r, &select.columns)?;
    Ok(SelectExpr {
        alias: select.alias,
        columns,
        from,
        where_clause,
        order_by,
        group_by,
        is_distinct: select.is_distinct,
        skip,
        take,
        is_reverse: select.is_reverse,
    })
}

pub fn walk_projection<R: ExprRewriter + ?Sized>(
    r: &mut R,
    projection: &ProjectionExpr,
) -> Result<ProjectionExpr, R::Error> {
    let select = r.rewrite_select(&projection.select)?;
    let projector = r.rewrite_expr(&projection.projector)?;
    Ok(ProjectionExpr {
        select: Box::new(select),
        projector: bx(projector),
        aggregator: projection.aggregator,
    })
}

fn rewrite_assignments<R: ExprRewriter + ?Sized>(
    r: &mut R,
    assignments: &[ColumnAssignment],
) -> Result<Vec<ColumnAssignment>, R::Error> {
    assignments
        .iter()
        .map(|a| {
            Ok(ColumnAssignment {
                column: a.column.clone(),
                expression: r.rewrite_expr(&a.expression)?,
            })
        })
        .collect()
}

pub fn walk_command<R: ExprRewriter + ?Sized>(r: &mut R, command: &CommandExpr) -> Result<CommandExpr, R::Error> {
    Ok(match command {
        CommandExpr::Insert { table, assignments } => CommandExpr::Insert {
            table: table.clone(),
            assignments: rewrite_assignments(r, assignments)?,
        },
        CommandExpr::Update {
            table,
            where_clause,
            assignments,
        } => CommandExpr::Update {
            table: table.clone(),
            where_clause: bx(r.rewrite_expr(where_clause)?),
            assignments: rewrite_assignments(r, assignments)?,
        },
        CommandExpr::Delete { table, where_clause } => CommandExpr::Delete {
            table: table.clone(),
            where_clause: rewrite_opt(r, where_clause)?,
        },
        CommandExpr::If {
            check,
            if_true,
            if_false,
        } => CommandExpr::If {
            check: bx(r.rewrite_expr(check)?),
            if_true: Box::new(walk_command(r, if_true)?),
            if_false: if_false
                .as_ref()
                .map(|f| walk_command(r, f).map(Box::new))
                .transpose()?,
        },
        CommandExpr::Batch {
            item,
            items,
            operation,
        } => CommandExpr::Batch {
            item: *item,
            items: rewrite_all(r, items)?,
            operation: Box::new(walk_command(r, operation)?),
        },
    })
}

// ============================================================================
// Gatherers
// ============================================================================

/// Aliases a FROM source makes visible to the select that owns it.
pub fn declared_aliases(source: &Expr) -> Vec<TableAlias> {
    let mut aliases = Vec::new();
    collect_declared(source, &mut aliases);
    aliases
}

fn collect_declared(source: &Expr, aliases: &mut Vec<TableAlias>) {
    match source {
        Expr::Select(s) => aliases.push(s.alias),
        Expr::Table(t) => aliases.push(t.alias),
        Expr::SetOperation(s) => aliases.push(s.alias),
        Expr::Join(j) => {
            collect_declared(&j.left, aliases);
            collect_declared(&j.right, aliases);
        }
        _ => {}
    }
}

#[derive(Default)]
struct AliasCollector {
    referenced: HashSet<TableAlias>,
    declared: HashSet<TableAlias>,
    columns: Vec<ColumnExpr>,
}

impl ExprVisitor for AliasCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column(c) => {
                self.referenced.insert(c.alias);
                if !self.columns.contains(c) {
                    self.columns.push(c.clone());
                }
            }
            Expr::Table(t) => {
                self.declared.insert(t.alias);
            }
            Expr::SetOperation(s) => {
                self.declared.insert(s.alias);
                walk_expr_ref(self, expr);
            }
            _ => walk_expr_ref(self, expr),
        }
    }

    fn visit_select(&mut self, select: &SelectExpr) {
        self.declared.insert(select.alias);
        walk_select_ref(self, select);
    }
}

/// Every alias referenced by a column anywhere under `expr`.
pub fn referenced_aliases(expr: &Expr) -> HashSet<TableAlias> {
    let mut collector = AliasCollector::default();
    collector.visit_expr(expr);
    collector.referenced
}

/// Aliases referenced under `expr` but not declared under it.
pub fn free_aliases(expr: &Expr) -> HashSet<TableAlias> {
    let mut collector = AliasCollector::default();
    collector.visit_expr(expr);
    collector
        .referenced
        .difference(&collector.declared)
        .copied()
        .collect()
}

pub fn free_aliases_of_select(select: &SelectExpr) -> HashSet<TableAlias> {
    let mut collector = AliasCollector::default();
    collector.visit_select(select);
    collector
        .referenced
        .difference(&collector.declared)
        .copied()
        .collect()
}

/// Distinct column references under `expr`, in first-seen order.
pub fn referenced_columns(expr: &Expr) -> Vec<ColumnExpr> {
    let mut collector = AliasCollector::default();
    collector.visit_expr(expr);
    collector.columns
}

/// Replaces columns for which `f` returns a substitute.
pub struct ColumnSubstituter<F: FnMut(&ColumnExpr) -> Option<Expr>> {
    f: F,
}

impl<F: FnMut(&ColumnExpr) -> Option<Expr>> ExprRewriter for ColumnSubstituter<F> {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        if let Expr::Column(c) = expr {
            if let Some(replacement) = (self.f)(c) {
                return Ok(replacement);
            }
        }
        walk_expr(self, expr)
    }
}

pub fn substitute_columns(expr: &Expr, f: impl FnMut(&ColumnExpr) -> Option<Expr>) -> Expr {
    infallible(ColumnSubstituter { f }.rewrite_expr(expr))
}

pub fn substitute_columns_in_select(select: &SelectExpr, f: impl FnMut(&ColumnExpr) -> Option<Expr>) -> SelectExpr {
    infallible(ColumnSubstituter { f }.rewrite_select(select))
}

/// Re-points columns of any alias in `old_aliases` to `new_alias`.
pub fn map_column_aliases(expr: &Expr, new_alias: TableAlias, old_aliases: &[TableAlias]) -> Expr {
    substitute_columns(expr, |c| {
        old_aliases
            .contains(&c.alias)
            .then(|| Expr::Column(ColumnExpr::new(new_alias, c.name.clone(), c.sql_type)))
    })
}

/// Re-points columns through an alias map, leaving unmapped aliases alone.
pub fn remap_aliases(expr: &Expr, map: &HashMap<TableAlias, TableAlias>) -> Expr {
    substitute_columns(expr, |c| {
        map.get(&c.alias)
            .map(|a| Expr::Column(ColumnExpr::new(*a, c.name.clone(), c.sql_type)))
    })
}

struct AggregateChecker {
    found: bool,
}

impl ExprVisitor for AggregateChecker {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Aggregate(_) => self.found = true,
            // Subqueries aggregate at their own level.
            Expr::Scalar(_) | Expr::Exists(_) | Expr::InSubquery(_) | Expr::AggregateSubquery(_) => {}
            Expr::Select(_) | Expr::Projection(_) => {}
            _ => walk_expr_ref(self, expr),
        }
    }
}

/// True when the select's own clauses compute an aggregate.
pub fn has_aggregates(select: &SelectExpr) -> bool {
    let mut checker = AggregateChecker { found: false };
    if let Some(w) = &select.where_clause {
        checker.visit_expr(w);
    }
    select.order_by.iter().for_each(|o| checker.visit_expr(&o.expression));
    select.columns.iter().for_each(|c| checker.visit_expr(&c.expression));
    checker.found
}

/// Splits a predicate into its top-level AND terms.
pub fn split_conjunction(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary(b) if b.op == super::BinaryOp::And => {
            let mut terms = split_conjunction(&b.left);
            terms.extend(split_conjunction(&b.right));
            terms
        }
        _ => vec![expr],
    }
}

/// ANDs predicates together, `None` when empty.
pub fn join_conjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    terms.into_iter().reduce(|acc, t| acc.and(t))
}
