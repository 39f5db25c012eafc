//! Insert / Update / InsertOrUpdate / Delete / Batch.
//!
//! The mapper builds the command shape from the entity and instance; the
//! binder rebinds member accesses on the instance and folds optional check
//! predicates, bound against the command's target table, into the WHERE.

use log::debug;

use super::{Binder, BinderError, BinderResult};
use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::relation_expr::members::bind_member;
use crate::query_compiler::relation_expr::visitors::{join_conjunction, walk_command, ExprRewriter};
use crate::query_compiler::relation_expr::{
    ColumnDeclaration, CommandExpr, Expr, Lambda, SelectExpr, SubqueryExpr, TableExpr,
};

impl Binder<'_> {
    pub(super) fn bind_insert(&mut self, entity: &str, instance: &Expr) -> BinderResult<Expr> {
        self.insert_command(entity, instance).map(Expr::Command)
    }

    pub(super) fn bind_update(&mut self, entity: &str, instance: &Expr, check: Option<&Lambda>) -> BinderResult<Expr> {
        self.update_command(entity, instance, check).map(Expr::Command)
    }

    /// `IF EXISTS (row with the instance's key) UPDATE ... ELSE INSERT ...`
    pub(super) fn bind_insert_or_update(
        &mut self,
        entity: &str,
        instance: &Expr,
        check: Option<&Lambda>,
    ) -> BinderResult<Expr> {
        let instance = self.rewrite_expr(instance)?;
        let projection = self.ctx.mapper().bind_table(self.ctx.language(), entity)?;
        let mut terms = Vec::new();
        for key in self.ctx.mapper().primary_key_members(entity)? {
            let column = bind_member(&projection.projector, &key);
            terms.push(column.eq(bind_member(&instance, &key)));
        }
        let exists = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("value", Expr::constant(1))],
            Some(Expr::Select(*projection.select)),
            join_conjunction(terms),
        );

        let update = self.update_command(entity, &instance, check)?;
        let insert = self.insert_command(entity, &instance)?;
        Ok(Expr::Command(CommandExpr::If {
            check: Box::new(Expr::Exists(SubqueryExpr::new(exists))),
            if_true: Box::new(update),
            if_false: Some(Box::new(insert)),
        }))
    }

    pub(super) fn bind_delete(
        &mut self,
        entity: &str,
        instance: Option<&Expr>,
        predicate: Option<&Lambda>,
    ) -> BinderResult<Expr> {
        let instance = instance.map(|i| self.rewrite_expr(i)).transpose()?;
        let command = self.ctx.mapper().delete_command(entity, instance.as_ref())?;
        let command = self.rebind_command(&command)?;
        let CommandExpr::Delete { table, where_clause } = command else {
            return Ok(Expr::Command(command));
        };
        let where_clause = match predicate {
            Some(predicate) => {
                let check = self.bind_check("Delete", entity, &table, predicate)?;
                Some(Box::new(match where_clause {
                    Some(existing) => existing.and(check),
                    None => check,
                }))
            }
            None => where_clause,
        };
        Ok(Expr::Command(CommandExpr::Delete { table, where_clause }))
    }

    /// One command shape with the lambda parameter left free; the executor
    /// binds it to each item in turn.
    pub(super) fn bind_batch(&mut self, items: &[Expr], operation: &Lambda) -> BinderResult<Expr> {
        let item = operation.param(0).ok_or(BinderError::LambdaArity {
            operator: "Batch",
            expected: 1,
        })?;
        let items = items
            .iter()
            .map(|i| self.rewrite_expr(i))
            .collect::<BinderResult<Vec<_>>>()?;
        let body = self.rewrite_expr(&operation.body)?;
        let Expr::Command(command) = body else {
            return Err(BinderError::NotACommand {
                expr: body.to_string(),
            });
        };
        debug!("Binder: batch of {} item(s)", items.len());
        Ok(Expr::Command(CommandExpr::Batch {
            item,
            items,
            operation: Box::new(command),
        }))
    }

    fn insert_command(&mut self, entity: &str, instance: &Expr) -> BinderResult<CommandExpr> {
        let instance = self.rewrite_expr(instance)?;
        let command = self.ctx.mapper().insert_command(entity, &instance)?;
        self.rebind_command(&command)
    }

    fn update_command(&mut self, entity: &str, instance: &Expr, check: Option<&Lambda>) -> BinderResult<CommandExpr> {
        let instance = self.rewrite_expr(instance)?;
        let command = self.ctx.mapper().update_command(entity, &instance)?;
        let command = self.rebind_command(&command)?;
        match (command, check) {
            (
                CommandExpr::Update {
                    table,
                    where_clause,
                    assignments,
                },
                Some(check),
            ) => {
                let check = self.bind_check("Update", entity, &table, check)?;
                Ok(CommandExpr::Update {
                    table,
                    where_clause: Box::new(where_clause.and(check)),
                    assignments,
                })
            }
            (command, _) => Ok(command),
        }
    }

    /// Binds `check` with its parameter standing for the target row.
    fn bind_check(
        &mut self,
        operator: &'static str,
        entity: &str,
        table: &TableExpr,
        check: &Lambda,
    ) -> BinderResult<Expr> {
        let row = self.ctx.mapper().entity_expression(entity, table)?;
        self.bind_lambda(operator, check, row)
    }

    /// Resolves `instance.Member` accesses the mapper left in the command.
    fn rebind_command(&mut self, command: &CommandExpr) -> BinderResult<CommandExpr> {
        walk_command(self, command)
    }
}
