//! Query duplication with fresh aliases.
//!
//! The copy is structurally identical to the input, but every alias declared
//! inside it and every lambda parameter bound inside it is replaced by a
//! fresh one. References to aliases declared outside the subtree are kept,
//! so a duplicated correlated subquery stays correlated to the same outer
//! relation.

use std::collections::HashMap;
use std::convert::Infallible;

use super::alias::{ParamId, TableAlias};
use super::relation_expr::visitors::{
    infallible, walk_command, walk_expr, walk_expr_ref, walk_select, ExprRewriter, ExprVisitor,
};
use super::relation_expr::{
    AggregateSubqueryExpr, ColumnAssignment, ColumnExpr, CommandExpr, Expr, Lambda, SelectExpr, SetOperationExpr,
    SubqueryExpr, TableExpr,
};

pub fn duplicate(expr: &Expr) -> Expr {
    let mut gatherer = DeclarationGatherer::default();
    gatherer.visit_expr(expr);
    infallible(Duplicator::from(gatherer).rewrite_expr(expr))
}

pub fn duplicate_select(select: &SelectExpr) -> SelectExpr {
    let mut gatherer = DeclarationGatherer::default();
    gatherer.visit_select(select);
    infallible(Duplicator::from(gatherer).rewrite_select(select))
}

/// Like [`duplicate`], also returning the declared-alias renaming it applied.
/// Expressions that declare nothing come back unchanged with an empty map.
pub fn duplicate_with_aliases(expr: &Expr) -> (Expr, HashMap<TableAlias, TableAlias>) {
    let mut gatherer = DeclarationGatherer::default();
    gatherer.visit_expr(expr);
    if gatherer.aliases.is_empty() && gatherer.params.is_empty() {
        return (expr.clone(), HashMap::new());
    }
    let mut duplicator = Duplicator::from(gatherer);
    let copy = infallible(duplicator.rewrite_expr(expr));
    (copy, duplicator.aliases)
}

#[derive(Default)]
struct DeclarationGatherer {
    aliases: HashMap<TableAlias, TableAlias>,
    params: HashMap<ParamId, ParamId>,
}

impl DeclarationGatherer {
    fn alias(&mut self, alias: TableAlias) {
        self.aliases.entry(alias).or_insert_with(TableAlias::new);
    }

    fn command(&mut self, command: &CommandExpr) {
        match command {
            CommandExpr::Insert { table, .. }
            | CommandExpr::Update { table, .. }
            | CommandExpr::Delete { table, .. } => self.alias(table.alias),
            CommandExpr::If { if_true, if_false, .. } => {
                self.command(if_true);
                if let Some(f) = if_false {
                    self.command(f);
                }
            }
            CommandExpr::Batch { item, operation, .. } => {
                self.params.entry(*item).or_insert_with(ParamId::new);
                self.command(operation);
            }
        }
    }
}

impl ExprVisitor for DeclarationGatherer {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Table(t) => self.alias(t.alias),
            Expr::SetOperation(s) => self.alias(s.alias),
            Expr::Lambda(l) => {
                for p in &l.params {
                    self.params.entry(*p).or_insert_with(ParamId::new);
                }
            }
            Expr::Command(c) => self.command(c),
            _ => {}
        }
        walk_expr_ref(self, expr);
    }

    fn visit_select(&mut self, select: &SelectExpr) {
        self.alias(select.alias);
        super::relation_expr::visitors::walk_select_ref(self, select);
    }
}

struct Duplicator {
    aliases: HashMap<TableAlias, TableAlias>,
    params: HashMap<ParamId, ParamId>,
}

impl From<DeclarationGatherer> for Duplicator {
    fn from(g: DeclarationGatherer) -> Self {
        Duplicator {
            aliases: g.aliases,
            params: g.params,
        }
    }
}

impl Duplicator {
    fn alias(&self, alias: TableAlias) -> TableAlias {
        self.aliases.get(&alias).copied().unwrap_or(alias)
    }

    fn param(&self, param: ParamId) -> ParamId {
        self.params.get(&param).copied().unwrap_or(param)
    }

    fn table(&self, table: &TableExpr) -> TableExpr {
        TableExpr {
            alias: self.alias(table.alias),
            entity: table.entity.clone(),
            name: table.name.clone(),
        }
    }

    fn assignments(&self, assignments: Vec<ColumnAssignment>) -> Vec<ColumnAssignment> {
        assignments
            .into_iter()
            .map(|mut a| {
                a.column.alias = self.alias(a.column.alias);
                a
            })
            .collect()
    }

    fn command(&mut self, command: &CommandExpr) -> CommandExpr {
        match command {
            CommandExpr::If {
                check,
                if_true,
                if_false,
            } => CommandExpr::If {
                check: Box::new(infallible(self.rewrite_expr(check))),
                if_true: Box::new(self.command(if_true)),
                if_false: if_false.as_ref().map(|f| Box::new(self.command(f))),
            },
            CommandExpr::Batch {
                item,
                items,
                operation,
            } => CommandExpr::Batch {
                item: self.param(*item),
                items: items.iter().map(|i| infallible(self.rewrite_expr(i))).collect(),
                operation: Box::new(self.command(operation)),
            },
            _ => match infallible(walk_command(self, command)) {
                CommandExpr::Insert { table, assignments } => CommandExpr::Insert {
                    table: self.table(&table),
                    assignments: self.assignments(assignments),
                },
                CommandExpr::Update {
                    table,
                    where_clause,
                    assignments,
                } => CommandExpr::Update {
                    table: self.table(&table),
                    where_clause,
                    assignments: self.assignments(assignments),
                },
                CommandExpr::Delete { table, where_clause } => CommandExpr::Delete {
                    table: self.table(&table),
                    where_clause,
                },
                other => other,
            },
        }
    }
}

impl ExprRewriter for Duplicator {
    type Error = Infallible;

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
        Ok(match expr {
            Expr::Table(t) => Expr::Table(self.table(t)),
            Expr::Column(c) => Expr::Column(ColumnExpr::new(self.alias(c.alias), c.name.clone(), c.sql_type)),
            Expr::Parameter(p) => Expr::Parameter(self.param(*p)),
            Expr::Lambda(l) => Expr::Lambda(Lambda {
                params: l.params.iter().map(|p| self.param(*p)).collect(),
                body: Box::new(self.rewrite_expr(&l.body)?),
            }),
            Expr::SetOperation(s) => Expr::SetOperation(SetOperationExpr {
                alias: self.alias(s.alias),
                kind: s.kind,
                left: Box::new(self.rewrite_select(&s.left)?),
                right: Box::new(self.rewrite_select(&s.right)?),
            }),
            Expr::AggregateSubquery(a) => Expr::AggregateSubquery(AggregateSubqueryExpr {
                correlation_id: super::alias::next_id(),
                group_by_alias: self.alias(a.group_by_alias),
                aggregate_in_group_select: Box::new(self.rewrite_expr(&a.aggregate_in_group_select)?),
                subquery: SubqueryExpr::new(self.rewrite_select(&a.subquery.select)?),
            }),
            Expr::Command(c) => Expr::Command(self.command(c)),
            _ => walk_expr(self, expr)?,
        })
    }

    fn rewrite_select(&mut self, select: &SelectExpr) -> Result<SelectExpr, Infallible> {
        let mut copy = walk_select(self, select)?;
        copy.alias = self.alias(select.alias);
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::relation_expr::visitors::{free_aliases, referenced_aliases};
    use crate::query_compiler::relation_expr::{comparer, ColumnDeclaration, SqlType};

    fn correlated(outer: TableAlias) -> SelectExpr {
        let t = TableAlias::new();
        SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("City", Expr::column(t, "City", SqlType::Text))],
            Some(Expr::Table(TableExpr {
                alias: t,
                entity: "Customer".into(),
                name: "Customers".into(),
            })),
            Some(Expr::column(t, "City", SqlType::Text).eq(Expr::column(outer, "City", SqlType::Text))),
        )
    }

    #[test]
    fn test_duplicate_renames_declared_aliases_only() {
        let outer = TableAlias::new();
        let original = Expr::Select(correlated(outer));
        let copy = duplicate(&original);

        assert_ne!(original, copy);
        assert!(comparer::are_equal(&original, &copy));

        let Expr::Select(orig_sel) = &original else { unreachable!() };
        let Expr::Select(copy_sel) = &copy else { unreachable!() };
        assert_ne!(orig_sel.alias, copy_sel.alias);

        // still correlated to the same outer alias
        assert_eq!(free_aliases(&copy), free_aliases(&original));
        assert!(referenced_aliases(&copy).contains(&outer));
    }

    #[test]
    fn test_duplicate_with_aliases_reports_renaming() {
        let select = correlated(TableAlias::new());
        let original_alias = select.alias;
        let (copy, aliases) = duplicate_with_aliases(&Expr::Select(select));
        let Expr::Select(copy) = copy else { unreachable!() };
        assert_eq!(aliases.get(&original_alias), Some(&copy.alias));

        let column = Expr::column(TableAlias::new(), "x", SqlType::Int);
        let (same, none) = duplicate_with_aliases(&column);
        assert_eq!(same, column);
        assert!(none.is_empty());
    }

    #[test]
    fn test_duplicate_twice_gives_distinct_aliases() {
        let select = correlated(TableAlias::new());
        let a = duplicate_select(&select);
        let b = duplicate_select(&select);
        assert_ne!(a.alias, b.alias);
    }
}
