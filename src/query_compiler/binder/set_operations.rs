//! Union / Concat / Intersect / Except.

use log::trace;

use super::{Binder, BinderError, BinderResult};
use crate::query_compiler::alias::{ParamId, TableAlias};
use crate::query_compiler::operator::{QueryOp, SetOpKind};
use crate::query_compiler::relation_expr::visitors::map_column_aliases;
use crate::query_compiler::relation_expr::{
    ColumnDeclaration, ColumnExpr, Expr, Lambda, ProjectionExpr, SelectExpr, SetOperationExpr, SetOperationKind,
};

impl Binder<'_> {
    pub(super) fn bind_set_operation(&mut self, kind: SetOpKind, left: &Expr, right: &Expr) -> BinderResult<Expr> {
        match kind {
            SetOpKind::Union => self.bind_union(left, right, SetOperationKind::Union),
            SetOpKind::Concat => self.bind_union(left, right, SetOperationKind::UnionAll),
            SetOpKind::Intersect => self.bind_membership_filter(left, right, false),
            SetOpKind::Except => self.bind_membership_filter(left, right, true),
        }
    }

    /// Both operands are projected to plain column lists; the right side's
    /// columns take the left side's names so the union exports one schema.
    fn bind_union(&mut self, left: &Expr, right: &Expr, kind: SetOperationKind) -> BinderResult<Expr> {
        let left = self.visit_sequence(left)?;
        let right = self.visit_sequence(right)?;

        let left_alias = TableAlias::new();
        let left_pc = self.project(&left.projector, left_alias, &[left.select.alias]);
        let right_alias = TableAlias::new();
        let right_pc = self.project(&right.projector, right_alias, &[right.select.alias]);

        if left_pc.columns.len() != right_pc.columns.len() {
            return Err(BinderError::SetOperandMismatch {
                operator: if kind == SetOperationKind::Union { "Union" } else { "Concat" },
                left: left_pc.columns.len(),
                right: right_pc.columns.len(),
            });
        }

        let right_columns = right_pc
            .columns
            .into_iter()
            .zip(&left_pc.columns)
            .map(|(column, named)| ColumnDeclaration {
                name: named.name.clone(),
                ..column
            })
            .collect();

        let set_alias = TableAlias::new();
        let outer_alias = TableAlias::new();
        let outer_columns = left_pc
            .columns
            .iter()
            .map(|c| {
                let column = ColumnExpr::new(set_alias, c.name.clone(), c.sql_type);
                ColumnDeclaration::new(c.name.clone(), Expr::Column(column))
            })
            .collect();
        let projector = map_column_aliases(&left_pc.projector, outer_alias, &[left_alias]);

        trace!("Binder: {:?} of {} and {} as {}", kind, left_alias, right_alias, set_alias);
        let set = SetOperationExpr {
            alias: set_alias,
            kind,
            left: Box::new(SelectExpr::new(
                left_alias,
                left_pc.columns,
                Some(Expr::Select(*left.select)),
                None,
            )),
            right: Box::new(SelectExpr::new(
                right_alias,
                right_columns,
                Some(Expr::Select(*right.select)),
                None,
            )),
        };
        Ok(Expr::Projection(ProjectionExpr::new(
            SelectExpr::new(outer_alias, outer_columns, Some(Expr::SetOperation(set)), None),
            projector,
        )))
    }

    /// `left.Where(x => right.Any(y => y == x)).Distinct()`, negated for Except.
    fn bind_membership_filter(&mut self, left: &Expr, right: &Expr, negate: bool) -> BinderResult<Expr> {
        let x = ParamId::new();
        let y = ParamId::new();
        let any = QueryOp::Any {
            source: right.clone(),
            predicate: Some(Lambda {
                params: vec![y],
                body: Box::new(Expr::Parameter(y).eq(Expr::Parameter(x))),
            }),
        }
        .into_expr();
        let predicate = Lambda {
            params: vec![x],
            body: Box::new(if negate { any.not() } else { any }),
        };
        let op = QueryOp::Distinct {
            source: QueryOp::Where {
                source: left.clone(),
                predicate,
            }
            .into_expr(),
        };
        self.bind_operator(&op, false)
    }
}
