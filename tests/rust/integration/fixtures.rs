use std::sync::Arc;

use relbind::mapping::MappingSchema;
use relbind::query_compiler::compile;
use relbind::query_compiler::compile_ctx::CompileCtx;
use relbind::query_compiler::evaluator::{execute, ClientValue, Fixture, Row};
use relbind::query_compiler::language::DialectCapabilities;
use relbind::query_compiler::relation_expr::{Expr, Value};
use relbind::query_dsl::parse_query;

pub const NORTHWIND: &str = r#"
entities:
  - name: Customer
    table: Customers
    members:
      - { name: CustomerID, sql_type: text, primary_key: true }
      - { name: CompanyName, sql_type: text }
      - { name: City, sql_type: text }
    associations:
      - { name: Orders, target: Order, keys: [CustomerID], related_keys: [CustomerID] }
  - name: Order
    table: Orders
    members:
      - { name: OrderID, sql_type: int, primary_key: true }
      - { name: CustomerID, sql_type: text }
      - { name: Freight, sql_type: float }
    associations:
      - { name: Customer, target: Customer, keys: [CustomerID], related_keys: [CustomerID], singleton: true }
"#;

pub const CUSTOMER_COUNT: usize = 91;
pub const LONDON_COUNT: usize = 6;
pub const CITY_COUNT: usize = 69;
/// Customer `i` places `i % 3` orders.
pub const ORDER_COUNT: usize = 90;

pub fn customer_id(i: usize) -> String {
    format!("C{:03}", i + 1)
}

/// Six customers live in London; the other 85 spread over 68 cities.
fn cities() -> Vec<String> {
    let mut others = 0;
    (0..CUSTOMER_COUNT)
        .map(|i| {
            if i % 15 == 7 {
                "London".to_string()
            } else {
                others += 1;
                format!("City {:02}", (others - 1) % 68)
            }
        })
        .collect()
}

pub fn fixture() -> Fixture {
    let customers = cities().into_iter().enumerate().map(|(i, city)| {
        Row::from_pairs([
            ("CustomerID", Value::from(customer_id(i))),
            ("CompanyName", Value::from(format!("Company {}", i + 1))),
            ("City", Value::from(city)),
        ])
    });
    let mut orders = Vec::new();
    for i in 0..CUSTOMER_COUNT {
        for n in 0..i % 3 {
            let id = orders.len() as i64 + 1;
            orders.push(Row::from_pairs([
                ("OrderID", Value::Int(id)),
                ("CustomerID", Value::from(customer_id(i))),
                ("Freight", Value::Float(10.0 * (n + 1) as f64)),
            ]));
        }
    }
    Fixture::new().with_table("Customers", customers).with_table("Orders", orders)
}

pub fn ctx(dialect: DialectCapabilities) -> CompileCtx {
    let schema = MappingSchema::from_yaml_str(NORTHWIND).unwrap();
    CompileCtx::new(Arc::new(schema), Arc::new(dialect))
}

pub fn compile_query(query: &str, dialect: DialectCapabilities) -> Expr {
    let op = parse_query(query).unwrap();
    compile(&op, &mut ctx(dialect)).unwrap()
}

pub fn run_query(query: &str, dialect: DialectCapabilities) -> ClientValue {
    execute(&compile_query(query, dialect), &fixture()).unwrap()
}

pub fn rows(value: &ClientValue) -> &[ClientValue] {
    value.as_list().expect("query result should be a list")
}

pub fn text(value: Option<&ClientValue>) -> String {
    match value.and_then(ClientValue::as_scalar) {
        Some(Value::Text(s)) => s.clone(),
        other => panic!("expected text, got {:?}", other),
    }
}
