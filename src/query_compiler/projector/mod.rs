//! # Column Projector
//!
//! Splits an expression into the columns a select must produce and a client
//! expression over those columns that rebuilds the original value.
//!
//! The walk is top-down. At every node the [`Nominator`] is asked whether the
//! subtree can become one server column of the new select; if so it is
//! replaced by a column reference into `new_alias`, otherwise the walk
//! continues into its children. Below nested projections and relations only
//! bare source columns are lifted, which is how correlated references are
//! re-pointed at the new select.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use log::trace;

use super::alias::TableAlias;
use super::language::{ProjectionAffinity, QueryLanguage};
use super::relation_expr::visitors::{infallible, walk_expr, walk_select, ExprRewriter};
use super::relation_expr::{ColumnDeclaration, ColumnExpr, Expr, SelectExpr};

pub mod nominator;

pub use nominator::{ColumnState, Nomination, Nominator};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumns {
    pub projector: Expr,
    pub columns: Vec<ColumnDeclaration>,
}

/// Projects `expr` through a new select aliased `new_alias` whose FROM
/// declares `source_aliases`. `existing` columns are kept and reused.
pub fn project_columns(
    language: &dyn QueryLanguage,
    affinity: ProjectionAffinity,
    expr: &Expr,
    existing: &[ColumnDeclaration],
    new_alias: TableAlias,
    source_aliases: &[TableAlias],
) -> ProjectedColumns {
    let mut projector = ColumnProjector {
        nominator: Nominator::new(language, affinity, source_aliases),
        new_alias,
        column_names: existing.iter().map(|c| c.name.clone()).collect(),
        columns: existing.to_vec(),
        mapped: HashMap::new(),
        next_column: 0,
        depth: 0,
    };
    let rebuilt = infallible(projector.rewrite_expr(expr));
    trace!(
        "ColumnProjector: {} columns for {} from {:?}",
        projector.columns.len(),
        new_alias,
        source_aliases
    );
    ProjectedColumns {
        projector: rebuilt,
        columns: projector.columns,
    }
}

struct ColumnProjector<'a> {
    nominator: Nominator<'a>,
    new_alias: TableAlias,
    columns: Vec<ColumnDeclaration>,
    column_names: HashSet<String>,
    mapped: HashMap<ColumnExpr, ColumnExpr>,
    next_column: usize,
    depth: usize,
}

impl ColumnProjector<'_> {
    fn unique_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut suffix = 1;
        while self.column_names.contains(&name) {
            name = format!("{}{}", base, suffix);
            suffix += 1;
        }
        name
    }

    fn next_column_name(&mut self) -> String {
        loop {
            let name = format!("c{}", self.next_column);
            self.next_column += 1;
            if !self.column_names.contains(&name) {
                return name;
            }
        }
    }

    fn declare(&mut self, name: String, expr: &Expr) -> ColumnExpr {
        let sql_type = expr.sql_type();
        self.column_names.insert(name.clone());
        self.columns.push(ColumnDeclaration {
            name: name.clone(),
            expression: expr.clone(),
            sql_type,
        });
        ColumnExpr::new(self.new_alias, name, sql_type)
    }

    fn make_column(&mut self, expr: &Expr) -> Expr {
        if let Some(existing) = self.columns.iter().find(|d| d.expression == *expr) {
            return Expr::Column(ColumnExpr::new(self.new_alias, existing.name.clone(), existing.sql_type));
        }
        match expr {
            Expr::Column(c) => {
                if let Some(mapped) = self.mapped.get(c) {
                    return Expr::Column(mapped.clone());
                }
                let name = self.unique_name(&c.name);
                let column = self.declare(name, expr);
                self.mapped.insert(c.clone(), column.clone());
                Expr::Column(column)
            }
            _ => {
                let name = self.next_column_name();
                Expr::Column(self.declare(name, expr))
            }
        }
    }
}

impl ExprRewriter for ColumnProjector<'_> {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        if self.nominator.nominate(expr, self.depth > 0).candidate {
            return Ok(self.make_column(expr));
        }
        match expr {
            Expr::Projection(_) | Expr::ClientJoin(_) => {
                self.depth += 1;
                let result = walk_expr(self, expr);
                self.depth -= 1;
                result
            }
            _ => walk_expr(self, expr),
        }
    }

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        self.depth += 1;
        let result = walk_select(self, select);
        self.depth -= 1;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::language::DialectCapabilities;
    use crate::query_compiler::operator::builder::new_object;
    use crate::query_compiler::relation_expr::{AggregateExpr, AggregateKind, SqlType, SubqueryExpr};

    fn col(alias: TableAlias, name: &str) -> Expr {
        Expr::column(alias, name, SqlType::Text)
    }

    #[test]
    fn test_projects_columns_and_rebuilds_shape() {
        let lang = DialectCapabilities::ansi();
        let src = TableAlias::new();
        let target = TableAlias::new();
        let shape = new_object([("City", col(src, "City")), ("Id", col(src, "CustomerID"))]);
        let pc = project_columns(&lang, ProjectionAffinity::Client, &shape, &[], target, &[src]);
        let names: Vec<&str> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["City", "CustomerID"]);
        assert_eq!(
            pc.projector,
            new_object([("City", col(target, "City")), ("Id", col(target, "CustomerID"))])
        );
    }

    #[test]
    fn test_same_column_is_projected_once() {
        let lang = DialectCapabilities::ansi();
        let src = TableAlias::new();
        let target = TableAlias::new();
        let shape = new_object([("A", col(src, "City")), ("B", col(src, "City"))]);
        let pc = project_columns(&lang, ProjectionAffinity::Client, &shape, &[], target, &[src]);
        assert_eq!(pc.columns.len(), 1);
    }

    #[test]
    fn test_column_name_collisions_get_suffixes() {
        let lang = DialectCapabilities::ansi();
        let a = TableAlias::new();
        let b = TableAlias::new();
        let target = TableAlias::new();
        let shape = new_object([("A", col(a, "Id")), ("B", col(b, "Id"))]);
        let pc = project_columns(&lang, ProjectionAffinity::Client, &shape, &[], target, &[a, b]);
        let names: Vec<&str> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Id1"]);
    }

    #[test]
    fn test_subquery_becomes_numbered_column() {
        let lang = DialectCapabilities::ansi();
        let src = TableAlias::new();
        let target = TableAlias::new();
        let inner = TableAlias::new();
        let count = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new(
                "value",
                Expr::Aggregate(AggregateExpr {
                    kind: AggregateKind::Count,
                    argument: None,
                    is_distinct: false,
                }),
            )],
            Some(Expr::Table(crate::query_compiler::relation_expr::TableExpr {
                alias: inner,
                entity: "Order".into(),
                name: "Orders".into(),
            })),
            Some(col(inner, "CustomerID").eq(col(src, "CustomerID"))),
        );
        let shape = new_object([("n", Expr::Scalar(SubqueryExpr::new(count)))]);
        let pc = project_columns(&lang, ProjectionAffinity::Client, &shape, &[], target, &[src]);
        assert_eq!(pc.columns.len(), 1);
        assert_eq!(pc.columns[0].name, "c0");
        assert!(matches!(pc.columns[0].expression, Expr::Scalar(_)));
    }

    #[test]
    fn test_correlated_reference_in_nested_select_is_lifted() {
        let lang = DialectCapabilities::ansi();
        let src = TableAlias::new();
        let target = TableAlias::new();
        let inner = TableAlias::new();
        let nested = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("x", col(inner, "x"))],
            Some(Expr::Table(crate::query_compiler::relation_expr::TableExpr {
                alias: inner,
                entity: "Order".into(),
                name: "Orders".into(),
            })),
            Some(col(inner, "k").eq(col(src, "k"))),
        );
        let shape = Expr::Exists(SubqueryExpr::new(nested)).not();
        // Exists with a free reference only to `src` is itself a column.
        let pc = project_columns(&lang, ProjectionAffinity::Client, &shape, &[], target, &[src]);
        assert_eq!(pc.columns.len(), 1);
        assert!(matches!(pc.columns[0].expression, Expr::Exists(_)));
    }
}
