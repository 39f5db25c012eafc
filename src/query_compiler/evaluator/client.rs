//! Client projector evaluation.
//!
//! A projection runs its select, then evaluates the projector once per row
//! with the row bound to the select's alias. Nested projections re-run per
//! outer row; client joins run their joined select once and match rows in
//! memory on their keys.

use std::sync::Arc;

use serde_json::json;

use super::errors::EvalError;
use super::ops::keys_equal;
use super::{Evaluator, Scope};
use crate::query_compiler::relation_expr::{Aggregator, ClientJoinExpr, Expr, ProjectionExpr, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientValue {
    Null,
    Scalar(Value),
    Object {
        type_name: Option<String>,
        members: Vec<(String, ClientValue)>,
    },
    List(Vec<ClientValue>),
    Grouping {
        key: Box<ClientValue>,
        elements: Vec<ClientValue>,
    },
}

impl From<Value> for ClientValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ClientValue::Null,
            Value::List(items) => ClientValue::List(items.into_iter().map(ClientValue::from).collect()),
            other => ClientValue::Scalar(other),
        }
    }
}

impl ClientValue {
    pub fn as_list(&self) -> Option<&[ClientValue]> {
        match self {
            ClientValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ClientValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&ClientValue> {
        match self {
            ClientValue::Object { members, .. } => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClientValue::Null => serde_json::Value::Null,
            ClientValue::Scalar(value) => scalar_json(value),
            ClientValue::Object { members, .. } => serde_json::Value::Object(
                members.iter().map(|(name, value)| (name.clone(), value.to_json())).collect(),
            ),
            ClientValue::List(items) => serde_json::Value::Array(items.iter().map(ClientValue::to_json).collect()),
            ClientValue::Grouping { key, elements } => json!({
                "key": key.to_json(),
                "elements": elements.iter().map(ClientValue::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

fn scalar_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(x) => json!(x),
        Value::Text(s) => json!(s),
        Value::List(items) => serde_json::Value::Array(items.iter().map(scalar_json).collect()),
    }
}

/// Inner key and projected value of every row of a client join's select.
pub(crate) type JoinedRows = Vec<(Vec<Value>, ClientValue)>;

fn aggregate(aggregator: Option<Aggregator>, mut values: Vec<ClientValue>) -> Result<ClientValue, EvalError> {
    let Some(aggregator) = aggregator else {
        return Ok(ClientValue::List(values));
    };
    if aggregator.is_single() && values.len() > 1 {
        return Err(EvalError::MoreThanOneElement);
    }
    let picked = if aggregator.is_last() { values.pop() } else { values.into_iter().next() };
    match picked {
        Some(value) => Ok(value),
        None if aggregator.or_default() => Ok(ClientValue::Null),
        None => Err(EvalError::NoElements),
    }
}

impl<'f> Evaluator<'f> {
    pub(super) fn run_projection(&self, projection: &ProjectionExpr, scope: &Scope) -> Result<ClientValue, EvalError> {
        let rows = self.eval_select(&projection.select, scope)?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let row_scope = scope.bind(projection.select.alias, row);
            values.push(self.eval_client(&projection.projector, &row_scope)?);
        }
        aggregate(projection.aggregator, values)
    }

    pub(super) fn eval_client(&self, expr: &Expr, scope: &Scope) -> Result<ClientValue, EvalError> {
        match expr {
            Expr::New(new) => {
                let mut members = Vec::with_capacity(new.members.len());
                for binding in &new.members {
                    members.push((binding.name.clone(), self.eval_client(&binding.expr, scope)?));
                }
                Ok(ClientValue::Object {
                    type_name: new.type_name.clone(),
                    members,
                })
            }
            Expr::Entity(entity) => self.eval_client(&entity.expr, scope),
            Expr::OuterJoined(outer) => {
                if self.eval_scalar(&outer.test, scope)?.is_null() {
                    Ok(ClientValue::Null)
                } else {
                    self.eval_client(&outer.expr, scope)
                }
            }
            Expr::Conditional(c) => {
                if self.is_true(&c.test, scope)? {
                    self.eval_client(&c.if_true, scope)
                } else {
                    self.eval_client(&c.if_false, scope)
                }
            }
            Expr::Grouping(grouping) => {
                let key = self.eval_client(&grouping.key, scope)?;
                let elements = match self.eval_client(&grouping.group, scope)? {
                    ClientValue::List(items) => items,
                    ClientValue::Null => Vec::new(),
                    single => vec![single],
                };
                Ok(ClientValue::Grouping {
                    key: Box::new(key),
                    elements,
                })
            }
            Expr::Member(access) => match self.eval_client(&access.expr, scope)? {
                ClientValue::Null => Ok(ClientValue::Null),
                target => target
                    .member(&access.member)
                    .cloned()
                    .ok_or_else(|| EvalError::Unsupported(format!("member {}", access.member))),
            },
            Expr::Projection(projection) => self.run_projection(projection, scope),
            Expr::ClientJoin(join) => self.client_join(join, scope),
            _ => self.eval_scalar(expr, scope).map(ClientValue::from),
        }
    }

    /// Outer and inner keys match with nulls equal.
    fn client_join(&self, join: &ClientJoinExpr, scope: &Scope) -> Result<ClientValue, EvalError> {
        let joined = self.joined_rows(join)?;
        let outer_key = join
            .outer_key
            .iter()
            .map(|k| self.eval_scalar(k, scope))
            .collect::<Result<Vec<_>, _>>()?;
        let matches = joined
            .iter()
            .filter(|(inner_key, _)| keys_equal(inner_key, &outer_key))
            .map(|(_, value)| value.clone())
            .collect();
        aggregate(join.projection.aggregator, matches)
    }

    fn joined_rows(&self, join: &ClientJoinExpr) -> Result<Arc<JoinedRows>, EvalError> {
        let alias = join.projection.select.alias;
        if let Some(rows) = self.client_joins.borrow().get(&alias) {
            return Ok(rows.clone());
        }
        let root = Scope::default();
        let mut joined = Vec::new();
        for row in self.eval_select(&join.projection.select, &root)? {
            let row_scope = root.bind(alias, row);
            let key = join
                .inner_key
                .iter()
                .map(|k| self.eval_scalar(k, &row_scope))
                .collect::<Result<Vec<_>, _>>()?;
            joined.push((key, self.eval_client(&join.projection.projector, &row_scope)?));
        }
        let joined = Arc::new(joined);
        self.client_joins.borrow_mut().insert(alias, joined.clone());
        Ok(joined)
    }
}
