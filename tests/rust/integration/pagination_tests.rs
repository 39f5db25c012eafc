use relbind::query_compiler::language::DialectCapabilities;
use test_case::test_case;

use super::fixtures::*;

fn ids(query: &str, dialect: DialectCapabilities) -> Vec<String> {
    let result = run_query(query, dialect);
    rows(&result).iter().map(|r| text(r.member("CustomerID"))).collect()
}

#[test_case(DialectCapabilities::ansi(); "offset fetch")]
#[test_case(DialectCapabilities::tsql(); "row number")]
#[test_case(DialectCapabilities::access(); "nested top")]
fn test_skip_take_returns_sixth_to_fifteenth(dialect: DialectCapabilities) {
    let page = ids("Customers.OrderBy(c => c.CustomerID).Skip(5).Take(10)", dialect);
    let expected: Vec<String> = (5..15).map(customer_id).collect();
    assert_eq!(page, expected);
}

#[test_case(DialectCapabilities::ansi(); "offset fetch")]
#[test_case(DialectCapabilities::tsql(); "row number")]
#[test_case(DialectCapabilities::access(); "nested top")]
fn test_descending_page(dialect: DialectCapabilities) {
    let page = ids("Customers.OrderByDescending(c => c.CustomerID).Skip(5).Take(10)", dialect);
    let expected: Vec<String> = (76..86).rev().map(customer_id).collect();
    assert_eq!(page, expected);
}

#[test_case(DialectCapabilities::ansi(); "offset fetch")]
#[test_case(DialectCapabilities::tsql(); "row number")]
#[test_case(DialectCapabilities::access(); "nested top")]
fn test_take_only(dialect: DialectCapabilities) {
    let page = ids("Customers.OrderBy(c => c.CustomerID).Take(3)", dialect);
    assert_eq!(page, vec!["C001", "C002", "C003"]);
}
