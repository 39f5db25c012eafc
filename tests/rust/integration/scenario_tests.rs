use std::collections::HashSet;

use relbind::query_compiler::compile;
use relbind::query_compiler::evaluator::{execute, ClientValue, Fixture, Row};
use relbind::query_compiler::language::DialectCapabilities;
use relbind::query_compiler::relation_expr::visitors::{walk_expr_ref, ExprVisitor};
use relbind::query_compiler::relation_expr::{BinaryOp, Expr, SelectExpr, Value};
use relbind::query_dsl::parse_query;
use test_case::test_case;

use super::fixtures::*;

fn ansi() -> DialectCapabilities {
    DialectCapabilities::ansi()
}

/// First WHERE clause found walking down a select's FROM chain.
fn first_where(select: &SelectExpr) -> Option<&Expr> {
    match (select.where_clause.as_deref(), select.from.as_deref()) {
        (Some(predicate), _) => Some(predicate),
        (None, Some(Expr::Select(inner))) => first_where(inner),
        _ => None,
    }
}

#[derive(Default)]
struct ClientJoinFinder {
    found: bool,
}

impl ExprVisitor for ClientJoinFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if matches!(expr, Expr::ClientJoin(_)) {
            self.found = true;
        }
        walk_expr_ref(self, expr)
    }
}

#[derive(Default)]
struct JoinCounter {
    joins: usize,
}

impl ExprVisitor for JoinCounter {
    fn visit_expr(&mut self, expr: &Expr) {
        if matches!(expr, Expr::Join(_)) {
            self.joins += 1;
        }
        walk_expr_ref(self, expr)
    }
}

/// Sums may come back as int or float depending on the argument type.
fn number(value: &ClientValue) -> f64 {
    match value {
        ClientValue::Scalar(Value::Float(f)) => *f,
        ClientValue::Scalar(Value::Int(i)) => *i as f64,
        other => panic!("expected number, got {:?}", other),
    }
}

fn int(value: Option<&ClientValue>) -> i64 {
    match value.and_then(ClientValue::as_scalar) {
        Some(Value::Int(i)) => *i,
        other => panic!("expected int, got {:?}", other),
    }
}

#[test]
fn test_london_filter_is_single_equality_and_returns_six_rows() {
    let compiled = compile_query(r#"Customers.Where(c => c.City == "London")"#, ansi());
    let Expr::Projection(projection) = &compiled else {
        panic!("expected projection, got {}", compiled)
    };
    let predicate = first_where(&projection.select).expect("where clause");
    assert!(matches!(predicate, Expr::Binary(b) if b.op == BinaryOp::Eq));

    let result = execute(&compiled, &fixture()).unwrap();
    let rows = rows(&result);
    assert_eq!(rows.len(), LONDON_COUNT);
    assert!(rows.iter().all(|r| text(r.member("City")) == "London"));
}

#[test]
fn test_group_by_city_produces_one_group_per_city() {
    let result = run_query("Customers.GroupBy(c => c.City)", ansi());
    let groups = rows(&result);
    assert_eq!(groups.len(), CITY_COUNT);

    let mut total = 0;
    for group in groups {
        let ClientValue::Grouping { key, elements } = group else {
            panic!("expected grouping, got {:?}", group)
        };
        total += elements.len();
        if key.as_scalar() == Some(&Value::from("London")) {
            assert_eq!(elements.len(), LONDON_COUNT);
        }
    }
    assert_eq!(total, CUSTOMER_COUNT);
}

#[test]
fn test_select_many_over_groups_returns_every_customer() {
    let result = run_query("Customers.GroupBy(c => c.City).SelectMany(g => g)", ansi());
    let rows = rows(&result);
    assert_eq!(rows.len(), CUSTOMER_COUNT);
    let ids: HashSet<String> = rows.iter().map(|r| text(r.member("CustomerID"))).collect();
    assert_eq!(ids.len(), CUSTOMER_COUNT);
}

#[test]
fn test_group_by_result_selector_counts_members() {
    let result = run_query("Customers.GroupBy(c => c.City, (k, g) => new { City = k, N = g.Count() })", ansi());
    let rows = rows(&result);
    assert_eq!(rows.len(), CITY_COUNT);
    let london = rows
        .iter()
        .find(|r| text(r.member("City")) == "London")
        .expect("London group");
    assert_eq!(int(london.member("N")), LONDON_COUNT as i64);
    assert_eq!(rows.iter().map(|r| int(r.member("N"))).sum::<i64>(), CUSTOMER_COUNT as i64);
}

#[test]
fn test_association_count_runs_on_the_server() {
    let compiled = compile_query("Customers.Select(c => new { c.City, N = c.Orders.Count() })", ansi());
    let mut finder = ClientJoinFinder::default();
    finder.visit_expr(&compiled);
    assert!(!finder.found, "count should not need a client join: {}", compiled);

    let result = execute(&compiled, &fixture()).unwrap();
    let rows = rows(&result);
    assert_eq!(rows.len(), CUSTOMER_COUNT);
    assert_eq!(rows.iter().map(|r| int(r.member("N"))).sum::<i64>(), ORDER_COUNT as i64);
}

#[test]
fn test_root_aggregates_and_elements() {
    assert_eq!(
        run_query(r#"Customers.Count(c => c.City == "London")"#, ansi()),
        ClientValue::Scalar(Value::Int(LONDON_COUNT as i64))
    );
    assert_eq!(
        run_query("Customers.Where(c => c.Orders.Any()).Count()", ansi()),
        ClientValue::Scalar(Value::Int(60))
    );
    let first = run_query("Customers.OrderBy(c => c.CustomerID).First()", ansi());
    assert_eq!(text(first.member("CustomerID")), "C001");
}

#[test]
fn test_default_if_empty_keeps_customers_without_orders() {
    let result = run_query(
        "Customers.SelectMany(c => c.Orders.DefaultIfEmpty(), (c, o) => new { c.CustomerID, o.OrderID })",
        ansi(),
    );
    let rows = rows(&result);
    // 90 orders plus one null-extended row for each of the 31 customers with none
    assert_eq!(rows.len(), ORDER_COUNT + 31);
    let missing = rows.iter().filter(|r| r.member("OrderID") == Some(&ClientValue::Null)).count();
    assert_eq!(missing, 31);
}

#[test]
fn test_union_removes_duplicates_and_concat_keeps_them() {
    let london = r#"Customers.Where(c => c.City == "London")"#;
    let union = run_query(&format!("{london}.Union({london})"), ansi());
    assert_eq!(rows(&union).len(), LONDON_COUNT);
    let concat = run_query(&format!("{london}.Concat({london})"), ansi());
    assert_eq!(rows(&concat).len(), 2 * LONDON_COUNT);
}

#[test]
fn test_null_group_keys_correlate_with_nulls_equal() {
    let customer = |id: &str, city: Value| {
        Row::from_pairs([
            ("CustomerID", Value::from(id)),
            ("CompanyName", Value::from(id)),
            ("City", city),
        ])
    };
    let fixture = Fixture::new().with_table(
        "Customers",
        vec![
            customer("A", Value::Null),
            customer("B", Value::from("Paris")),
            customer("C", Value::Null),
        ],
    );
    let op = parse_query("Customers.GroupBy(c => c.City)").unwrap();
    let compiled = compile(&op, &mut ctx(ansi())).unwrap();
    let result = execute(&compiled, &fixture).unwrap();
    let groups = rows(&result);
    assert_eq!(groups.len(), 2);
    let null_group = groups
        .iter()
        .find_map(|g| match g {
            ClientValue::Grouping { key, elements } if **key == ClientValue::Null => Some(elements),
            _ => None,
        })
        .expect("null-keyed group");
    assert_eq!(null_group.len(), 2);
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_distinct_count_counts_distinct_rows(dialect: DialectCapabilities) {
    assert_eq!(
        run_query("Customers.Select(c => c.City).Distinct().Count()", dialect),
        ClientValue::Scalar(Value::Int(CITY_COUNT as i64))
    );
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_distinct_count_per_group(dialect: DialectCapabilities) {
    let query = "Customers.GroupBy(c => c.City)\
        .Select(g => new { g.Key, D = g.Select(c => c.City).Distinct().Count() })\
        .Sum(x => x.D)";
    assert_eq!(number(&run_query(query, dialect)), CITY_COUNT as f64);
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_distinct_sum_adds_each_value_once(dialect: DialectCapabilities) {
    // freights are 10 and 20 only
    let total = run_query("Orders.Select(o => o.Freight).Distinct().Sum()", dialect);
    assert_eq!(number(&total), 30.0);
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_root_default_if_empty_over_rows_keeps_them(dialect: DialectCapabilities) {
    let compiled = compile_query("Customers.DefaultIfEmpty()", dialect);
    let sql = compiled.to_string();
    assert_eq!(sql.matches(" JOIN ").count(), sql.matches(" ON ").count(), "{}", sql);
    let result = execute(&compiled, &fixture()).unwrap();
    let rows = rows(&result);
    assert_eq!(rows.len(), CUSTOMER_COUNT);
    assert_eq!(text(rows[0].member("CustomerID")), "C001");
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_root_default_if_empty_over_nothing_yields_one_default(dialect: DialectCapabilities) {
    let result = run_query(r#"Customers.Where(c => c.City == "Nowhere").DefaultIfEmpty()"#, dialect);
    assert_eq!(rows(&result), &[ClientValue::Null]);
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_repeated_singleton_access_joins_once(dialect: DialectCapabilities) {
    let compiled = compile_query(
        "Orders.Select(o => new { o.OrderID, A = o.Customer.City, B = o.Customer.CompanyName })",
        dialect,
    );
    let mut counter = JoinCounter::default();
    counter.visit_expr(&compiled);
    assert_eq!(counter.joins, 1, "{}", compiled);

    let result = execute(&compiled, &fixture()).unwrap();
    let rows = rows(&result);
    assert_eq!(rows.len(), ORDER_COUNT);
    assert!(rows.iter().all(|r| text(r.member("B")).starts_with("Company ")));
}
