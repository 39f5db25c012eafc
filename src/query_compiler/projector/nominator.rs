//! Nominator: decides which subexpressions may become server columns.
//!
//! Classification is a pure function of the subtree and the scope it is
//! asked about, so the projector can query it at any node without shared
//! mutable state.

use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::language::{ProjectionAffinity, QueryLanguage};
use crate::query_compiler::relation_expr::visitors::{free_aliases, free_aliases_of_select};
use crate::query_compiler::relation_expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnState {
    MustBeColumn,
    CanBeColumn,
    CannotBeColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nomination {
    pub state: ColumnState,
    /// Replace this subtree with a column.
    pub candidate: bool,
}

impl Nomination {
    fn candidate(state: ColumnState) -> Self {
        Nomination { state, candidate: true }
    }

    fn not_candidate(state: ColumnState) -> Self {
        Nomination {
            state,
            candidate: false,
        }
    }

    /// Whether a parent that can be a column may absorb this child.
    fn allows_parent(&self) -> bool {
        self.candidate || self.state == ColumnState::CanBeColumn
    }
}

pub struct Nominator<'a> {
    language: &'a dyn QueryLanguage,
    affinity: ProjectionAffinity,
    source_aliases: &'a [TableAlias],
}

impl<'a> Nominator<'a> {
    pub fn new(
        language: &'a dyn QueryLanguage,
        affinity: ProjectionAffinity,
        source_aliases: &'a [TableAlias],
    ) -> Self {
        Nominator {
            language,
            affinity,
            source_aliases,
        }
    }

    /// `nested` is true below a nested relation or projection, where only
    /// bare columns of the source aliases are lifted out.
    pub fn nominate(&self, expr: &Expr, nested: bool) -> Nomination {
        match expr {
            Expr::Column(c) => {
                if self.source_aliases.contains(&c.alias) {
                    Nomination::candidate(ColumnState::MustBeColumn)
                } else {
                    Nomination::not_candidate(ColumnState::CannotBeColumn)
                }
            }
            _ if self.language.must_be_column(expr) => {
                // A group aggregate is evaluated in its owning select, so only
                // its fallback subquery's correlation counts.
                let free = match expr {
                    Expr::AggregateSubquery(a) => free_aliases_of_select(&a.subquery.select),
                    _ => free_aliases(expr),
                };
                let in_scope = free.iter().all(|a| self.source_aliases.contains(a));
                if !nested && in_scope {
                    Nomination::candidate(ColumnState::MustBeColumn)
                } else {
                    Nomination::not_candidate(ColumnState::CannotBeColumn)
                }
            }
            // Constants never become columns on their own.
            Expr::Constant(_) => Nomination::not_candidate(ColumnState::CanBeColumn),
            _ if self.language.can_be_column(expr) => {
                let children_allow = scalar_children(expr)
                    .into_iter()
                    .all(|child| self.nominate(child, nested).allows_parent());
                if !children_allow {
                    Nomination::not_candidate(ColumnState::CannotBeColumn)
                } else if self.affinity == ProjectionAffinity::Server {
                    Nomination::candidate(ColumnState::CanBeColumn)
                } else {
                    // Client affinity: evaluate on the client over its columns.
                    Nomination::not_candidate(ColumnState::CannotBeColumn)
                }
            }
            _ => Nomination::not_candidate(ColumnState::CannotBeColumn),
        }
    }
}

fn scalar_children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary(b) => vec![&b.left, &b.right],
        Expr::Unary(u) => vec![&u.operand],
        Expr::Conditional(c) => vec![&c.test, &c.if_true, &c.if_false],
        Expr::IsNull(e) => vec![e],
        Expr::Between(b) => vec![&b.expr, &b.lower, &b.upper],
        Expr::InValues(i) => std::iter::once(i.expr.as_ref()).chain(i.values.iter()).collect(),
        Expr::Call(c) => c.args.iter().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::language::DialectCapabilities;
    use crate::query_compiler::relation_expr::SqlType;

    #[test]
    fn test_constants_are_not_nominated_but_do_not_block() {
        let lang = DialectCapabilities::ansi();
        let a = TableAlias::new();
        let sources = [a];
        let nominator = Nominator::new(&lang, ProjectionAffinity::Server, &sources);

        assert!(!nominator.nominate(&Expr::constant(2), false).candidate);
        let expr = Expr::column(a, "Price", SqlType::Float).times(Expr::constant(2));
        assert!(nominator.nominate(&expr, false).candidate);
    }

    #[test]
    fn test_client_affinity_keeps_operators_on_client() {
        let lang = DialectCapabilities::ansi();
        let a = TableAlias::new();
        let sources = [a];
        let nominator = Nominator::new(&lang, ProjectionAffinity::Client, &sources);
        let expr = Expr::column(a, "Price", SqlType::Float).times(Expr::constant(2));
        assert!(!nominator.nominate(&expr, false).candidate);
    }

    #[test]
    fn test_out_of_scope_column_blocks_parent() {
        let lang = DialectCapabilities::ansi();
        let a = TableAlias::new();
        let other = TableAlias::new();
        let sources = [a];
        let nominator = Nominator::new(&lang, ProjectionAffinity::Server, &sources);
        let expr = Expr::column(a, "x", SqlType::Int).eq(Expr::column(other, "y", SqlType::Int));
        let n = nominator.nominate(&expr, false);
        assert!(!n.candidate);
        assert_eq!(n.state, ColumnState::CannotBeColumn);
    }
}
