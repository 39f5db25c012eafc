use std::collections::HashSet;
use std::sync::Arc;

use relbind::mapping::MappingSchema;
use relbind::query_compiler::alias::TableAlias;
use relbind::query_compiler::binder::bind;
use relbind::query_compiler::compile;
use relbind::query_compiler::compile_ctx::CompileCtx;
use relbind::query_compiler::language::DialectCapabilities;
use relbind::query_compiler::relation_expr::visitors::{walk_expr_ref, walk_select_ref, ExprVisitor};
use relbind::query_compiler::relation_expr::{Expr, SelectExpr};
use relbind::query_compiler::rewriter::{RedundantSubqueryRemover, RewriterPass, UnusedColumnRemover};
use relbind::query_dsl::parse_query;
use test_case::test_case;

const SCHEMA: &str = r#"
entities:
  - name: Customer
    table: Customers
    members:
      - { name: CustomerID, sql_type: text, primary_key: true }
      - { name: City, sql_type: text }
    associations:
      - { name: Orders, target: Order, keys: [CustomerID], related_keys: [CustomerID] }
  - name: Order
    table: Orders
    members:
      - { name: OrderID, sql_type: int, primary_key: true }
      - { name: CustomerID, sql_type: text }
      - { name: Freight, sql_type: float }
"#;

const QUERIES: &[&str] = &[
    r#"Customers.Where(c => c.City == "London")"#,
    "Customers.GroupBy(c => c.City)",
    "Customers.GroupBy(c => c.City).Select(g => new { City = g.Key, N = g.Count() })",
    "Customers.Select(c => new { c.CustomerID, c.Orders })",
    "Customers.SelectMany(c => c.Orders, (c, o) => new { c.City, o.Freight })",
    "Customers.OrderBy(c => c.City).Skip(5).Take(10)",
    "Customers.Where(c => c.City == \"London\").Union(Customers.Where(c => c.City == \"Paris\"))",
];

fn ctx(dialect: DialectCapabilities) -> CompileCtx {
    CompileCtx::new(Arc::new(MappingSchema::from_yaml_str(SCHEMA).unwrap()), Arc::new(dialect))
}

/// Collects every relation alias declared in a tree, with repeats.
#[derive(Default)]
struct AliasCollector {
    aliases: Vec<TableAlias>,
    selects: Vec<SelectExpr>,
}

impl ExprVisitor for AliasCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Table(t) => self.aliases.push(t.alias),
            Expr::SetOperation(s) => self.aliases.push(s.alias),
            _ => {}
        }
        walk_expr_ref(self, expr)
    }

    fn visit_select(&mut self, select: &SelectExpr) {
        self.aliases.push(select.alias);
        self.selects.push(select.clone());
        walk_select_ref(self, select)
    }
}

fn collect(expr: &Expr) -> AliasCollector {
    let mut collector = AliasCollector::default();
    collector.visit_expr(expr);
    collector
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_aliases_are_pairwise_distinct(dialect: DialectCapabilities) {
    for query in QUERIES {
        let compiled = compile(&parse_query(query).unwrap(), &mut ctx(dialect.clone())).unwrap();
        let aliases = collect(&compiled).aliases;
        let distinct: HashSet<_> = aliases.iter().collect();
        assert_eq!(distinct.len(), aliases.len(), "duplicate alias in {}: {}", query, compiled);
    }
}

#[test_case(DialectCapabilities::ansi(); "ansi")]
#[test_case(DialectCapabilities::tsql(); "tsql")]
#[test_case(DialectCapabilities::access(); "access")]
fn test_column_names_are_unique_per_select(dialect: DialectCapabilities) {
    for query in QUERIES {
        let compiled = compile(&parse_query(query).unwrap(), &mut ctx(dialect.clone())).unwrap();
        for select in collect(&compiled).selects {
            let names: HashSet<_> = select.columns.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names.len(), select.columns.len(), "duplicate column in {}: {}", query, select);
        }
    }
}

fn assert_fixed_point(pass: &dyn RewriterPass) {
    for query in QUERIES {
        let mut ctx = ctx(DialectCapabilities::ansi());
        let bound = Arc::new(bind(&parse_query(query).unwrap(), &ctx).unwrap());
        let once = pass.rewrite(bound, &mut ctx).unwrap().get_plan();
        let twice = pass.rewrite(once.clone(), &mut ctx).unwrap();
        assert!(!twice.is_yes(), "{} is not idempotent on {}", pass.pass(), query);
        assert_eq!(twice.get_plan(), once);
    }
}

#[test]
fn test_redundant_subquery_remover_is_idempotent() {
    assert_fixed_point(&RedundantSubqueryRemover);
}

#[test]
fn test_unused_column_remover_is_idempotent() {
    assert_fixed_point(&UnusedColumnRemover);
}

#[test]
fn test_transformed_passes_are_traced() {
    let mut ctx = ctx(DialectCapabilities::tsql());
    let op = parse_query("Customers.OrderBy(c => c.City).Skip(5).Take(10)").unwrap();
    compile(&op, &mut ctx).unwrap();
    assert!(ctx
        .transformed_passes()
        .iter()
        .any(|p| p.to_string() == "SkipToRowNumber"));
}
