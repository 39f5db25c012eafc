//! Dialect capabilities.
//!
//! [`QueryLanguage`] is the predicate set the compiler consults whenever a
//! decision depends on what the target SQL dialect can express: which nodes
//! may become server columns, how pagination is spelled, and whether certain
//! subquery shapes are allowed. [`DialectCapabilities`] is the data-driven
//! implementation loaded from configuration.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::function_registry;
use super::relation_expr::visitors::declared_aliases;
use super::relation_expr::{
    BinaryOp, ColumnDeclaration, ColumnExpr, Expr, OuterJoinedExpr, ProjectionExpr, SelectExpr,
};
use crate::query_compiler::alias::TableAlias;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// Native OFFSET/FETCH; skip and take stay on the select.
    #[default]
    OffsetFetch,
    /// Nested inverted-order TOP layers.
    NestedTop,
    /// ROW_NUMBER() window column filtered in an outer select.
    RowNumber,
}

/// Which side wins when a node could run on either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionAffinity {
    #[default]
    Client,
    Server,
}

pub trait QueryLanguage: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Nodes that can only ever exist as a whole server column.
    fn must_be_column(&self, expr: &Expr) -> bool {
        matches!(
            expr,
            Expr::Aggregate(_)
                | Expr::AggregateSubquery(_)
                | Expr::Scalar(_)
                | Expr::Exists(_)
                | Expr::InSubquery(_)
                | Expr::RowNumber(_)
        )
    }

    /// Nodes the server can evaluate if their children can.
    fn can_be_column(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Binary(_)
            | Expr::Unary(_)
            | Expr::Conditional(_)
            | Expr::IsNull(_)
            | Expr::Between(_)
            | Expr::InValues(_)
            | Expr::Constant(_) => true,
            Expr::Call(c) => function_registry::is_server_function(&c.function, c.args.len()),
            _ => false,
        }
    }

    fn supports_offset_fetch(&self) -> bool;

    fn allows_subquery_in_select_without_from(&self) -> bool;

    fn allows_distinct_in_aggregates(&self) -> bool;

    fn pagination(&self) -> PaginationStrategy;

    /// Picks a nullable column that tells whether an outer-joined `select`
    /// produced a row: a column the select is correlated on if there is one,
    /// else a constant.
    fn outer_join_test(&self, select: &SelectExpr) -> Expr {
        let aliases = select.from.as_deref().map(declared_aliases).unwrap_or_default();
        let join_columns = select
            .where_clause
            .as_deref()
            .map(|w| join_columns(&aliases, w))
            .unwrap_or_default();
        if let Some(first) = join_columns.first() {
            for jc in &join_columns {
                let as_expr = Expr::Column(jc.clone());
                if select.columns.iter().any(|c| c.expression == as_expr) {
                    return as_expr;
                }
            }
            return Expr::Column(first.clone());
        }
        Expr::constant(1)
    }

    /// Exposes the outer-join test as a column of the projection's select and
    /// wraps the projector in an [`OuterJoinedExpr`] over it.
    fn add_outer_join_test(&self, projection: ProjectionExpr) -> ProjectionExpr {
        let test = self.outer_join_test(&projection.select);
        let mut select = *projection.select;
        let existing = select.columns.iter().find(|c| c.expression == test).map(|c| c.name.clone());
        let test_column = match existing {
            Some(name) => ColumnExpr::new(select.alias, name, test.sql_type()),
            None => {
                let base = test.as_column().map(|c| c.name.clone()).unwrap_or_else(|| "Test".to_string());
                let name = select.available_column_name(&base);
                let sql_type = test.sql_type();
                select.columns.push(ColumnDeclaration {
                    name: name.clone(),
                    expression: test,
                    sql_type,
                });
                ColumnExpr::new(select.alias, name, sql_type)
            }
        };
        ProjectionExpr {
            select: Box::new(select),
            projector: Box::new(Expr::OuterJoined(OuterJoinedExpr {
                test: Box::new(Expr::Column(test_column)),
                expr: projection.projector,
            })),
            aggregator: projection.aggregator,
        }
    }
}

/// Columns of `aliases` compared for (in)equality against external columns
/// in an AND-chain.
pub fn join_columns(aliases: &[TableAlias], predicate: &Expr) -> Vec<ColumnExpr> {
    let mut columns = Vec::new();
    gather_join_columns(aliases, predicate, &mut columns);
    columns
}

fn gather_join_columns(aliases: &[TableAlias], expr: &Expr, columns: &mut Vec<ColumnExpr>) {
    let Expr::Binary(b) = expr else { return };
    let is_external = |e: &Expr| matches!(e, Expr::Column(c) if !aliases.contains(&c.alias));
    match b.op {
        BinaryOp::Eq | BinaryOp::NotEq => {
            let inner = if is_external(&b.left) {
                b.right.as_column()
            } else if is_external(&b.right) {
                b.left.as_column()
            } else {
                None
            };
            if let Some(c) = inner {
                if aliases.contains(&c.alias) && !columns.contains(c) {
                    columns.push(c.clone());
                }
            }
        }
        BinaryOp::And => {
            gather_join_columns(aliases, &b.left, columns);
            gather_join_columns(aliases, &b.right, columns);
        }
        _ => {}
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DialectCapabilities {
    #[validate(length(min = 1, message = "dialect name cannot be empty"))]
    pub name: String,
    #[serde(default)]
    pub supports_offset_fetch: bool,
    #[serde(default = "default_true")]
    pub allows_subquery_in_select_without_from: bool,
    #[serde(default = "default_true")]
    pub allows_distinct_in_aggregates: bool,
    #[serde(default)]
    pub pagination: PaginationStrategy,
}

impl DialectCapabilities {
    /// Native OFFSET/FETCH, every subquery shape allowed.
    pub fn ansi() -> Self {
        DialectCapabilities {
            name: "ansi".to_string(),
            supports_offset_fetch: true,
            allows_subquery_in_select_without_from: true,
            allows_distinct_in_aggregates: true,
            pagination: PaginationStrategy::OffsetFetch,
        }
    }

    /// ROW_NUMBER() paging.
    pub fn tsql() -> Self {
        DialectCapabilities {
            name: "tsql".to_string(),
            supports_offset_fetch: false,
            allows_subquery_in_select_without_from: true,
            allows_distinct_in_aggregates: true,
            pagination: PaginationStrategy::RowNumber,
        }
    }

    /// TOP-only paging, no FROM-less subqueries, no DISTINCT aggregates.
    pub fn access() -> Self {
        DialectCapabilities {
            name: "access".to_string(),
            supports_offset_fetch: false,
            allows_subquery_in_select_without_from: false,
            allows_distinct_in_aggregates: false,
            pagination: PaginationStrategy::NestedTop,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ansi" | "postgres" | "sqlite" => Some(Self::ansi()),
            "tsql" | "mssql" | "sqlserver" => Some(Self::tsql()),
            "access" => Some(Self::access()),
            _ => None,
        }
    }
}

impl Default for DialectCapabilities {
    fn default() -> Self {
        Self::ansi()
    }
}

impl QueryLanguage for DialectCapabilities {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_offset_fetch(&self) -> bool {
        self.supports_offset_fetch
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        self.allows_subquery_in_select_without_from
    }

    fn allows_distinct_in_aggregates(&self) -> bool {
        self.allows_distinct_in_aggregates
    }

    fn pagination(&self) -> PaginationStrategy {
        if self.supports_offset_fetch {
            PaginationStrategy::OffsetFetch
        } else if self.pagination == PaginationStrategy::OffsetFetch {
            PaginationStrategy::RowNumber
        } else {
            self.pagination
        }
    }
}
