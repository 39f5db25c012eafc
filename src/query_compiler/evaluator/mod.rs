//! # Reference Evaluator
//!
//! Executes compiled trees against in-memory tables. It is the oracle the
//! scenario tests compare against, not an engine: every relation is fully
//! materialised and correlated subqueries re-run once per outer row.
//!
//! - [`Fixture`] holds the tables, loadable from JSON
//! - relation nodes produce frames, one row binding per declared alias
//! - scalar nodes follow SQL three-valued logic
//! - projectors rebuild [`ClientValue`]s from the rows of their select

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde_json::Map;

pub mod client;
pub mod errors;
mod ops;
mod relation;
mod scalar;

pub use client::ClientValue;
pub use errors::EvalError;

use super::alias::TableAlias;
use super::relation_expr::{ColumnExpr, Expr, Value};
use client::JoinedRows;

/// One row of named values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Row { columns }
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, Value)>) -> Self {
        Row {
            columns: pairs.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn first(&self) -> Value {
        self.columns.first().map(|(_, v)| v.clone()).unwrap_or(Value::Null)
    }

    pub fn values(&self) -> Vec<Value> {
        self.columns.iter().map(|(_, v)| v.clone()).collect()
    }

    fn from_json(object: Map<String, serde_json::Value>) -> Self {
        Row {
            columns: object.into_iter().map(|(k, v)| (k, value_from_json(v))).collect(),
        }
    }
}

fn value_from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(value_from_json).collect()),
        serde_json::Value::Object(_) => Value::Null,
    }
}

/// In-memory tables keyed by table name.
///
/// The JSON form is an object of table name to an array of row objects:
///
/// ```json
/// { "Customers": [ { "CustomerID": "C001", "City": "London" } ] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    tables: HashMap<String, Vec<Arc<Row>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: impl IntoIterator<Item = Row>) -> Self {
        self.tables.insert(name.into(), rows.into_iter().map(Arc::new).collect());
        self
    }

    pub fn table(&self, name: &str) -> Option<&[Arc<Row>]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn from_json_str(json: &str) -> Result<Self, EvalError> {
        let raw: HashMap<String, Vec<Map<String, serde_json::Value>>> =
            serde_json::from_str(json).map_err(|e| EvalError::Fixture(e.to_string()))?;
        let tables = raw
            .into_iter()
            .map(|(name, rows)| (name, rows.into_iter().map(|r| Arc::new(Row::from_json(r))).collect()))
            .collect();
        Ok(Fixture { tables })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Fixture(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

/// Row bindings produced by one relation: `None` is the null row of an
/// unmatched outer join side.
pub(crate) type Frame = Vec<(TableAlias, Option<Arc<Row>>)>;

/// What a scalar node can see: bindings of every enclosing relation, and
/// for grouped selects the frames of the current group.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    bindings: Vec<(TableAlias, Option<Arc<Row>>)>,
    group: Option<Arc<Vec<Frame>>>,
    row_number: Option<i64>,
}

impl Scope {
    /// Inner bindings shadow outer ones. Group and row number do not carry
    /// into the extended scope.
    pub(crate) fn extend(&self, frame: &Frame) -> Scope {
        let mut bindings = self.bindings.clone();
        bindings.extend(frame.iter().cloned());
        Scope {
            bindings,
            group: None,
            row_number: None,
        }
    }

    pub(crate) fn bind(&self, alias: TableAlias, row: Row) -> Scope {
        self.extend(&vec![(alias, Some(Arc::new(row)))])
    }

    fn with_group(mut self, frames: Vec<Frame>) -> Scope {
        self.group = Some(Arc::new(frames));
        self
    }

    fn column(&self, column: &ColumnExpr) -> Result<Value, EvalError> {
        let (_, row) = self
            .bindings
            .iter()
            .rev()
            .find(|(alias, _)| *alias == column.alias)
            .ok_or(EvalError::DanglingAlias(column.alias))?;
        match row {
            None => Ok(Value::Null),
            Some(row) => row.get(&column.name).cloned().ok_or_else(|| EvalError::UnknownColumn {
                alias: column.alias,
                column: column.name.clone(),
            }),
        }
    }
}

pub(crate) struct Evaluator<'f> {
    fixture: &'f Fixture,
    /// Client join sides, each executed once per evaluation.
    client_joins: RefCell<HashMap<TableAlias, Arc<JoinedRows>>>,
}

impl<'f> Evaluator<'f> {
    pub(crate) fn new(fixture: &'f Fixture) -> Self {
        Evaluator {
            fixture,
            client_joins: RefCell::new(HashMap::new()),
        }
    }
}

fn describe(expr: &Expr) -> String {
    let text = expr.to_string();
    if text.chars().count() > 60 {
        format!("{}...", text.chars().take(60).collect::<String>())
    } else {
        text
    }
}

/// Runs a compiled tree. Projections yield a list, or a single value when
/// they carry an aggregator.
pub fn execute(expr: &Expr, fixture: &Fixture) -> Result<ClientValue, EvalError> {
    let evaluator = Evaluator::new(fixture);
    let root = Scope::default();
    let result = match expr {
        Expr::Projection(p) => evaluator.run_projection(p, &root),
        Expr::Command(_) => Err(EvalError::Unsupported("command".to_string())),
        other => evaluator.eval_client(other, &root),
    }?;
    debug!("execute: {} top-level value(s)", result.as_list().map(<[_]>::len).unwrap_or(1));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::compile;
    use crate::query_compiler::operator::builder::{new_object, Query};
    use crate::query_compiler::test_support::ctx;

    fn customer(id: &str, city: Option<&str>) -> Row {
        Row::from_pairs([
            ("CustomerID", Value::from(id)),
            ("CompanyName", Value::from(format!("Company {}", id))),
            ("City", city.map(Value::from).unwrap_or(Value::Null)),
        ])
    }

    fn order(id: i64, customer: Option<&str>, freight: f64) -> Row {
        Row::from_pairs([
            ("OrderID", Value::Int(id)),
            ("CustomerID", customer.map(Value::from).unwrap_or(Value::Null)),
            ("Freight", Value::Float(freight)),
        ])
    }

    fn fixture() -> Fixture {
        Fixture::new()
            .with_table(
                "Customers",
                vec![
                    customer("ALFKI", Some("Berlin")),
                    customer("AROUT", Some("London")),
                    customer("BSBEV", Some("London")),
                    customer("NOCTY", None),
                ],
            )
            .with_table(
                "Orders",
                vec![
                    order(1, Some("ALFKI"), 10.0),
                    order(2, Some("ALFKI"), 20.5),
                    order(3, Some("AROUT"), 5.0),
                    order(4, None, 1.0),
                ],
            )
    }

    fn run(query: Expr) -> ClientValue {
        let mut ctx = ctx();
        let compiled = compile(&query, &mut ctx).unwrap();
        execute(&compiled, &fixture()).unwrap()
    }

    #[test]
    fn test_filter_with_unknown_city_excludes_nulls() {
        let result = run(Query::table("Customers").filter(|c| c.member("City").ne(Expr::constant("London"))).into_expr());
        let rows = result.as_list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].member("CustomerID"), Some(&ClientValue::from(Value::from("ALFKI"))));
    }

    #[test]
    fn test_count_aggregator_over_filtered_rows() {
        let result = run(Query::table("Customers")
            .filter(|c| c.member("City").eq(Expr::constant("London")))
            .count());
        assert_eq!(result, ClientValue::from(Value::Int(2)));
    }

    #[test]
    fn test_nested_collection_is_joined_per_customer() {
        let result = run(Query::table("Customers").select(|c| {
            new_object([("Id", c.clone().member("CustomerID")), ("Orders", c.member("Orders"))])
        })
        .into_expr());
        let rows = result.as_list().unwrap();
        assert_eq!(rows.len(), 4);
        let counts: Vec<usize> = rows
            .iter()
            .map(|r| r.member("Orders").and_then(ClientValue::as_list).map(<[_]>::len).unwrap_or(0))
            .collect();
        assert_eq!(counts, vec![2, 1, 0, 0]);
    }

    #[test]
    fn test_fixture_from_json() {
        let fixture = Fixture::from_json_str(r#"{"Orders": [{"OrderID": 1, "Freight": 2.5, "CustomerID": null}]}"#)
            .unwrap();
        let rows = fixture.table("Orders").unwrap();
        assert_eq!(rows[0].get("OrderID"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("Freight"), Some(&Value::Float(2.5)));
        assert_eq!(rows[0].get("CustomerID"), Some(&Value::Null));
        assert!(matches!(Fixture::from_json_str("[1]"), Err(EvalError::Fixture(_))));
    }

    #[test]
    fn test_dangling_alias_is_reported() {
        let column = Expr::column(TableAlias::new(), "City", crate::query_compiler::relation_expr::SqlType::Text);
        assert!(matches!(execute(&column, &fixture()), Err(EvalError::DanglingAlias(_))));
    }
}
