//! Scalar node evaluation over a [`Scope`].

use std::cmp::Ordering;

use super::errors::EvalError;
use super::ops::{self, as_float, compare, truth};
use super::{describe, Evaluator, Scope};
use crate::query_compiler::relation_expr::{AggregateExpr, AggregateKind, BinaryOp, Expr, SelectExpr, Value};

/// `v IN (values)`: unknown when nothing matched and a null took part.
fn in_list(value: &Value, candidates: &[Value]) -> Result<Value, EvalError> {
    if candidates.is_empty() {
        return Ok(Value::Bool(false));
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mut saw_null = false;
    for candidate in candidates {
        match compare(value, candidate)? {
            Some(Ordering::Equal) => return Ok(Value::Bool(true)),
            None => saw_null = true,
            Some(_) => {}
        }
    }
    Ok(if saw_null { Value::Null } else { Value::Bool(false) })
}

fn extreme(values: Vec<Value>, wanted: Ordering) -> Result<Value, EvalError> {
    let mut best: Option<Value> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match compare(&value, &current)? {
                Some(o) if o == wanted => Some(value),
                _ => Some(current),
            },
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

fn sum(values: &[Value]) -> Result<Value, EvalError> {
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        for value in values {
            if let Value::Int(i) = value {
                total = total.checked_add(*i).ok_or(EvalError::Overflow)?;
            }
        }
        return Ok(Value::Int(total));
    }
    let mut total = 0.0;
    for value in values {
        total += as_float(value).ok_or_else(|| EvalError::mismatch("SUM", value, &Value::Float(0.0)))?;
    }
    Ok(Value::Float(total))
}

impl<'f> Evaluator<'f> {
    pub(super) fn is_true(&self, predicate: &Expr, scope: &Scope) -> Result<bool, EvalError> {
        Ok(truth(&self.eval_scalar(predicate, scope)?)? == Some(true))
    }

    pub(super) fn eval_scalar(&self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        match expr {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Column(column) => scope.column(column),
            Expr::Binary(b) => {
                let left = self.eval_scalar(&b.left, scope)?;
                let right = self.eval_scalar(&b.right, scope)?;
                ops::binary(b.op, left, right)
            }
            Expr::Unary(u) => ops::unary(u.op, self.eval_scalar(&u.operand, scope)?),
            Expr::Conditional(c) => {
                if self.is_true(&c.test, scope)? {
                    self.eval_scalar(&c.if_true, scope)
                } else {
                    self.eval_scalar(&c.if_false, scope)
                }
            }
            Expr::Call(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|a| self.eval_scalar(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                ops::call_function(&call.function, &args)
            }
            Expr::IsNull(operand) => Ok(Value::Bool(self.eval_scalar(operand, scope)?.is_null())),
            Expr::Between(b) => {
                let value = self.eval_scalar(&b.expr, scope)?;
                let lower = self.eval_scalar(&b.lower, scope)?;
                let upper = self.eval_scalar(&b.upper, scope)?;
                let above = ops::binary(BinaryOp::GtEq, value.clone(), lower)?;
                let below = ops::binary(BinaryOp::LtEq, value, upper)?;
                ops::binary(BinaryOp::And, above, below)
            }
            Expr::InValues(i) => {
                let value = self.eval_scalar(&i.expr, scope)?;
                let mut candidates = Vec::with_capacity(i.values.len());
                for v in &i.values {
                    match self.eval_scalar(v, scope)? {
                        Value::List(items) => candidates.extend(items),
                        item => candidates.push(item),
                    }
                }
                in_list(&value, &candidates)
            }
            Expr::InSubquery(i) => {
                let value = self.eval_scalar(&i.expr, scope)?;
                let candidates: Vec<Value> = self.eval_select(&i.select, scope)?.iter().map(|r| r.first()).collect();
                in_list(&value, &candidates)
            }
            Expr::Exists(s) => Ok(Value::Bool(!self.eval_select(&s.select, scope)?.is_empty())),
            Expr::Scalar(s) => self.scalar_subquery(&s.select, scope),
            Expr::AggregateSubquery(a) => self.scalar_subquery(&a.subquery.select, scope),
            Expr::Aggregate(a) => self.aggregate(a, scope),
            Expr::RowNumber(_) => scope.row_number.map(Value::Int).ok_or(EvalError::RowNumberOutsideSelect),
            other => Err(EvalError::Unsupported(describe(other))),
        }
    }

    fn scalar_subquery(&self, select: &SelectExpr, scope: &Scope) -> Result<Value, EvalError> {
        let rows = self.eval_select(select, scope)?;
        match rows.as_slice() {
            [] => Ok(Value::Null),
            [row] => Ok(row.first()),
            _ => Err(EvalError::ScalarSubqueryRows(rows.len())),
        }
    }

    /// Aggregates skip nulls. SUM, MIN, MAX and AVG of nothing are null.
    fn aggregate(&self, aggregate: &AggregateExpr, scope: &Scope) -> Result<Value, EvalError> {
        let frames = scope.group.clone().ok_or(EvalError::AggregateOutsideGroup)?;
        let Some(argument) = aggregate.argument.as_deref() else {
            return match aggregate.kind {
                kind if kind.is_count() => Ok(Value::Int(frames.len() as i64)),
                kind => Err(EvalError::Unsupported(format!("{} without an argument", kind))),
            };
        };

        let mut values: Vec<Value> = Vec::with_capacity(frames.len());
        for frame in frames.iter() {
            let value = self.eval_scalar(argument, &scope.extend(frame))?;
            if value.is_null() {
                continue;
            }
            if aggregate.is_distinct && values.iter().any(|v| matches!(compare(v, &value), Ok(Some(Ordering::Equal)))) {
                continue;
            }
            values.push(value);
        }

        match aggregate.kind {
            AggregateKind::Count | AggregateKind::LongCount => Ok(Value::Int(values.len() as i64)),
            _ if values.is_empty() => Ok(Value::Null),
            AggregateKind::Sum => sum(&values),
            AggregateKind::Min => extreme(values, Ordering::Less),
            AggregateKind::Max => extreme(values, Ordering::Greater),
            AggregateKind::Average => {
                let count = values.len() as f64;
                match sum(&values)? {
                    Value::Int(total) => Ok(Value::Float(total as f64 / count)),
                    Value::Float(total) => Ok(Value::Float(total / count)),
                    other => Ok(other),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::alias::TableAlias;
    use crate::query_compiler::evaluator::{Fixture, Row};
    use crate::query_compiler::relation_expr::{ColumnDeclaration, InValuesExpr, SqlType, SubqueryExpr, TableExpr};

    fn fixture() -> Fixture {
        Fixture::new().with_table(
            "T",
            vec![
                Row::from_pairs([("x", Value::Int(4))]),
                Row::from_pairs([("x", Value::Null)]),
                Row::from_pairs([("x", Value::Int(2))]),
            ],
        )
    }

    fn over_t(column: Expr) -> (TableAlias, SelectExpr) {
        let t = TableAlias::new();
        let from = Expr::Table(TableExpr {
            alias: t,
            entity: "T".to_string(),
            name: "T".to_string(),
        });
        (t, SelectExpr::new(TableAlias::new(), vec![ColumnDeclaration::new("v", column)], Some(from), None))
    }

    #[test]
    fn test_in_list_is_unknown_when_a_null_takes_part() {
        assert_eq!(in_list(&Value::Int(1), &[Value::Int(1), Value::Null]).unwrap(), Value::Bool(true));
        assert_eq!(in_list(&Value::Int(3), &[Value::Int(1), Value::Null]).unwrap(), Value::Null);
        assert_eq!(in_list(&Value::Null, &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_in_values_flattens_constant_lists() {
        let fixture = fixture();
        let evaluator = Evaluator::new(&fixture);
        let expr = Expr::InValues(InValuesExpr {
            expr: Box::new(Expr::constant(2)),
            values: vec![Expr::Constant(Value::List(vec![Value::Int(1), Value::Int(2)]))],
        });
        assert_eq!(evaluator.eval_scalar(&expr, &Scope::default()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let fixture = fixture();
        let evaluator = Evaluator::new(&fixture);
        let aggregate = |kind| {
            let t = TableAlias::new();
            let arg = Expr::column(t, "x", SqlType::Int);
            (t, Expr::Aggregate(AggregateExpr {
                kind,
                argument: Some(Box::new(arg)),
                is_distinct: false,
            }))
        };
        for (kind, expected) in [
            (AggregateKind::Count, Value::Int(2)),
            (AggregateKind::Sum, Value::Int(6)),
            (AggregateKind::Min, Value::Int(2)),
            (AggregateKind::Max, Value::Int(4)),
            (AggregateKind::Average, Value::Float(3.0)),
        ] {
            let (t, expr) = aggregate(kind);
            let from = Expr::Table(TableExpr {
                alias: t,
                entity: "T".to_string(),
                name: "T".to_string(),
            });
            let select = SelectExpr::new(TableAlias::new(), vec![ColumnDeclaration::new("v", expr)], Some(from), None);
            let rows = evaluator.eval_select(&select, &Scope::default()).unwrap();
            assert_eq!(rows[0].first(), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_scalar_subquery_with_many_rows_fails() {
        let fixture = fixture();
        let evaluator = Evaluator::new(&fixture);
        let (_, select) = over_t(Expr::constant(1));
        let expr = Expr::Scalar(SubqueryExpr::new(select));
        assert_eq!(
            evaluator.eval_scalar(&expr, &Scope::default()),
            Err(EvalError::ScalarSubqueryRows(3))
        );
    }

    #[test]
    fn test_aggregate_outside_group_is_an_error() {
        let fixture = fixture();
        let evaluator = Evaluator::new(&fixture);
        let count = Expr::Aggregate(AggregateExpr {
            kind: AggregateKind::Count,
            argument: None,
            is_distinct: false,
        });
        assert_eq!(
            evaluator.eval_scalar(&count, &Scope::default()),
            Err(EvalError::AggregateOutsideGroup)
        );
    }

    #[test]
    fn test_exists_and_between() {
        let fixture = fixture();
        let evaluator = Evaluator::new(&fixture);
        let (t, select) = over_t(Expr::constant(1));
        let filtered = select.with_where(Some(Expr::column(t, "x", SqlType::Int).gt(Expr::constant(3))));
        let exists = Expr::Exists(SubqueryExpr::new(filtered));
        assert_eq!(evaluator.eval_scalar(&exists, &Scope::default()).unwrap(), Value::Bool(true));

        let between = Expr::Between(crate::query_compiler::relation_expr::BetweenExpr {
            expr: Box::new(Expr::constant(6)),
            lower: Box::new(Expr::constant(6)),
            upper: Box::new(Expr::constant(15)),
        });
        assert_eq!(evaluator.eval_scalar(&between, &Scope::default()).unwrap(), Value::Bool(true));
    }
}
