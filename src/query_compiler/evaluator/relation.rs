//! Relation execution: sources, joins, grouping, ordering and paging.

use std::borrow::Cow;
use std::cmp::Ordering;

use log::trace;

use super::errors::EvalError;
use super::ops::{as_int, keys_equal, sort_order};
use super::{describe, Evaluator, Frame, Row, Scope};
use crate::query_compiler::relation_expr::visitors::{declared_aliases, has_aggregates};
use crate::query_compiler::relation_expr::{
    Expr, JoinExpr, JoinKind, OrderExpr, OrderType, RowNumberExpr, SelectExpr, SetOperationExpr, SetOperationKind,
    Value,
};

/// One output row before distinct/order/paging, with its sort keys.
struct Produced {
    row: Row,
    keys: Vec<Value>,
}

fn compare_keys(orderings: &[OrderExpr], a: &[Value], b: &[Value]) -> Ordering {
    orderings
        .iter()
        .zip(a.iter().zip(b))
        .map(|(o, (x, y))| match o.order_type {
            OrderType::Ascending => sort_order(x, y),
            OrderType::Descending => sort_order(y, x),
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn distinct_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut kept: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let values = row.values();
        if !kept.iter().any(|k| keys_equal(&k.values(), &values)) {
            kept.push(row);
        }
    }
    kept
}

fn null_frame(source: Option<&Expr>) -> Frame {
    source
        .map(declared_aliases)
        .unwrap_or_default()
        .into_iter()
        .map(|alias| (alias, None))
        .collect()
}

fn row_number_of(select: &SelectExpr) -> Option<&RowNumberExpr> {
    select.columns.iter().find_map(|c| match &c.expression {
        Expr::RowNumber(r) => Some(r),
        _ => None,
    })
}

impl<'f> Evaluator<'f> {
    pub(super) fn eval_source(&self, source: &Expr, env: &Scope) -> Result<Vec<Frame>, EvalError> {
        match source {
            Expr::Table(table) => {
                let rows = self
                    .fixture
                    .table(&table.name)
                    .ok_or_else(|| EvalError::UnknownTable(table.name.clone()))?;
                Ok(rows.iter().map(|r| vec![(table.alias, Some(r.clone()))]).collect())
            }
            Expr::Select(select) => Ok(self
                .eval_select(select, env)?
                .into_iter()
                .map(|r| vec![(select.alias, Some(r.into()))])
                .collect()),
            Expr::SetOperation(set) => Ok(self
                .eval_set_operation(set, env)?
                .into_iter()
                .map(|r| vec![(set.alias, Some(r.into()))])
                .collect()),
            Expr::Join(join) => self.eval_join(join, env),
            other => Err(EvalError::Unsupported(format!("source {}", describe(other)))),
        }
    }

    /// Left rows drive the join. Apply joins re-run the right side for each
    /// left row; the others run it once.
    fn eval_join(&self, join: &JoinExpr, env: &Scope) -> Result<Vec<Frame>, EvalError> {
        let lefts = self.eval_source(&join.left, env)?;
        let shared = if join.kind.is_apply() {
            None
        } else {
            Some(self.eval_source(&join.right, env)?)
        };
        let keeps_unmatched = matches!(join.kind, JoinKind::LeftOuter | JoinKind::OuterApply);

        let mut frames = Vec::new();
        for left in lefts {
            let scope = env.extend(&left);
            let rights = match &shared {
                Some(rights) => Cow::Borrowed(rights),
                None => Cow::Owned(self.eval_source(&join.right, &scope)?),
            };
            let mut matched = false;
            for right in rights.iter() {
                if let Some(condition) = join.condition.as_deref() {
                    if !self.is_true(condition, &scope.extend(right))? {
                        continue;
                    }
                }
                matched = true;
                frames.push(left.iter().chain(right).cloned().collect());
            }
            if !matched && keeps_unmatched {
                frames.push(left.iter().cloned().chain(null_frame(Some(&join.right))).collect());
            }
        }
        Ok(frames)
    }

    /// Right rows take the left side's column names by position.
    fn eval_set_operation(&self, set: &SetOperationExpr, env: &Scope) -> Result<Vec<Row>, EvalError> {
        let names: Vec<String> = set.left.columns.iter().map(|c| c.name.clone()).collect();
        let mut rows = self.eval_select(&set.left, env)?;
        for right in self.eval_select(&set.right, env)? {
            rows.push(Row::new(names.iter().cloned().zip(right.values()).collect()));
        }
        Ok(match set.kind {
            SetOperationKind::UnionAll => rows,
            SetOperationKind::Union => distinct_rows(rows),
        })
    }

    pub(super) fn eval_select(&self, select: &SelectExpr, env: &Scope) -> Result<Vec<Row>, EvalError> {
        let from = select.from.as_deref();
        let frames = match from {
            Some(source) => self.eval_source(source, env)?,
            None => vec![Vec::new()],
        };

        let mut filtered = Vec::with_capacity(frames.len());
        for frame in frames {
            if let Some(predicate) = select.where_clause.as_deref() {
                if !self.is_true(predicate, &env.extend(&frame))? {
                    continue;
                }
            }
            filtered.push(frame);
        }

        let mut units = if !select.group_by.is_empty() || has_aggregates(select) {
            self.group(select, env, filtered)?
        } else {
            filtered.iter().map(|f| env.extend(f)).collect()
        };
        if let Some(row_number) = row_number_of(select) {
            self.number_rows(&row_number.order_by, &mut units)?;
        }

        let mut produced = Vec::with_capacity(units.len());
        for unit in &units {
            let mut columns = Vec::with_capacity(select.columns.len());
            for decl in &select.columns {
                columns.push((decl.name.clone(), self.eval_scalar(&decl.expression, unit)?));
            }
            let keys = select
                .order_by
                .iter()
                .map(|o| self.eval_scalar(&o.expression, unit))
                .collect::<Result<Vec<_>, _>>()?;
            produced.push(Produced {
                row: Row::new(columns),
                keys,
            });
        }

        if select.is_distinct {
            let mut kept: Vec<Produced> = Vec::with_capacity(produced.len());
            for p in produced {
                let values = p.row.values();
                if !kept.iter().any(|k| keys_equal(&k.row.values(), &values)) {
                    kept.push(p);
                }
            }
            produced = kept;
        }
        produced.sort_by(|a, b| compare_keys(&select.order_by, &a.keys, &b.keys));
        let mut rows: Vec<Row> = produced.into_iter().map(|p| p.row).collect();
        if select.is_reverse {
            rows.reverse();
        }

        if let Some(skip) = select.skip.as_deref() {
            let skip = as_int(&self.eval_scalar(skip, env)?)?.max(0) as usize;
            rows = rows.into_iter().skip(skip).collect();
        }
        if let Some(take) = select.take.as_deref() {
            let take = as_int(&self.eval_scalar(take, env)?)?.max(0) as usize;
            rows.truncate(take);
        }
        trace!("eval_select: {} produced {} row(s)", select.alias, rows.len());
        Ok(rows)
    }

    /// Splits frames into groups with null-equal keys. An ungrouped
    /// aggregate over no rows still yields one group.
    fn group(&self, select: &SelectExpr, env: &Scope, frames: Vec<Frame>) -> Result<Vec<Scope>, EvalError> {
        let mut groups: Vec<(Vec<Value>, Vec<Frame>)> = Vec::new();
        for frame in frames {
            let scope = env.extend(&frame);
            let key = select
                .group_by
                .iter()
                .map(|g| self.eval_scalar(g, &scope))
                .collect::<Result<Vec<_>, _>>()?;
            match groups.iter_mut().find(|(k, _)| keys_equal(k, &key)) {
                Some((_, members)) => members.push(frame),
                None => groups.push((key, vec![frame])),
            }
        }
        if groups.is_empty() && select.group_by.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }
        Ok(groups
            .into_iter()
            .map(|(_, members)| {
                let representative = members
                    .first()
                    .cloned()
                    .unwrap_or_else(|| null_frame(select.from.as_deref()));
                env.extend(&representative).with_group(members)
            })
            .collect())
    }

    fn number_rows(&self, order_by: &[OrderExpr], units: &mut [Scope]) -> Result<(), EvalError> {
        let mut keyed = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            let keys = order_by
                .iter()
                .map(|o| self.eval_scalar(&o.expression, unit))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((index, keys));
        }
        keyed.sort_by(|a, b| compare_keys(order_by, &a.1, &b.1));
        for (rank, (index, _)) in keyed.into_iter().enumerate() {
            units[index].row_number = Some(rank as i64 + 1);
        }
        Ok(())
    }
}
