use relbind::query_compiler::operator::QueryOp;
use relbind::query_compiler::relation_expr::Expr;
use relbind::query_dsl::errors::DslError;
use relbind::query_dsl::parse_query;
use test_case::test_case;

fn operator_names(mut expr: Expr) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Expr::Operator(op) = expr {
        names.push(op.name());
        expr = match *op {
            QueryOp::Where { source, .. }
            | QueryOp::Select { source, .. }
            | QueryOp::OrderBy { source, .. }
            | QueryOp::ThenBy { source, .. }
            | QueryOp::Take { source, .. }
            | QueryOp::Skip { source, .. }
            | QueryOp::Distinct { source }
            | QueryOp::Element { source, .. }
            | QueryOp::Aggregate { source, .. } => source,
            _ => break,
        };
    }
    names
}

#[test]
fn test_method_chain_lowers_outermost_first() {
    let expr = parse_query(
        r#"Customers.Where(c => c.City != null && c.City.StartsWith("L"))
             .OrderBy(c => c.City).ThenByDescending(c => c.CustomerID)
             .Select(c => new { c.City, Upper = ToUpper(c.City) })
             .Distinct().Skip(2).Take(3).Count()"#,
    )
    .unwrap();
    assert_eq!(
        operator_names(expr),
        vec!["Aggregate", "Take", "Skip", "Distinct", "Select", "ThenBy", "OrderBy", "Where", "Table"]
    );
}

#[test_case("Customers.Where(c => )"; "missing lambda body")]
#[test_case("Customers.Where(c => c.City"; "unclosed call")]
#[test_case("Customers.Select(c => new { City = })"; "missing initialiser")]
#[test_case("Customers.Where(c => c.City == \"London)"; "unterminated string")]
#[test_case("Customers.Take(1) Take(2)"; "trailing input")]
fn test_malformed_input_is_a_parse_error(input: &str) {
    assert!(matches!(parse_query(input), Err(DslError::Parse { .. })));
}

#[test]
fn test_unknown_function_is_rejected() {
    assert_eq!(
        parse_query("Customers.Select(c => Soundex(c.City))"),
        Err(DslError::UnknownOperator("Soundex".to_string()))
    );
}
