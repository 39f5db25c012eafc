use std::collections::HashMap;
use std::path::Path;

use log::debug;

use super::config::{AssociationDefinition, EntityDefinition, MappingConfig};
use super::errors::MappingError;
use super::{Mapper, MappingResult};
use crate::query_compiler::alias::TableAlias;
use crate::query_compiler::language::{ProjectionAffinity, QueryLanguage};
use crate::query_compiler::projector::project_columns;
use crate::query_compiler::relation_expr::members::bind_member;
use crate::query_compiler::relation_expr::visitors::join_conjunction;
use crate::query_compiler::relation_expr::{
    Aggregator, ColumnAssignment, ColumnExpr, CommandExpr, EntityExpr, Expr, MemberBinding, NewExpr,
    ProjectionExpr, SelectExpr, TableExpr,
};

/// Mapping metadata indexed by entity name.
#[derive(Debug, Clone)]
pub struct MappingSchema {
    entities: HashMap<String, EntityDefinition>,
}

impl MappingSchema {
    pub fn new(config: MappingConfig) -> MappingResult<Self> {
        config.validate_all()?;
        let entities = config
            .entities
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();
        Ok(MappingSchema { entities })
    }

    pub fn from_yaml_str(yaml: &str) -> MappingResult<Self> {
        Self::new(MappingConfig::from_yaml_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> MappingResult<Self> {
        Self::new(MappingConfig::from_yaml_file(path)?)
    }

    pub fn entity(&self, name: &str) -> MappingResult<&EntityDefinition> {
        self.entities
            .get(name)
            .ok_or_else(|| MappingError::entity_not_found(name))
    }

    /// Entity names accept both `Customer` and the table name `Customers`
    /// as a query root.
    pub fn resolve_entity(&self, name: &str) -> MappingResult<&EntityDefinition> {
        self.entities
            .get(name)
            .or_else(|| self.entities.values().find(|e| e.table == name))
            .ok_or_else(|| MappingError::entity_not_found(name))
    }

    fn association(&self, entity: &str, member: &str) -> Option<&AssociationDefinition> {
        self.entities
            .get(entity)
            .and_then(|e| e.associations.iter().find(|a| a.name == member))
    }

    fn new_table(&self, definition: &EntityDefinition) -> TableExpr {
        TableExpr {
            alias: TableAlias::new(),
            entity: definition.name.clone(),
            name: definition.table.clone(),
        }
    }

    fn entity_projector(definition: &EntityDefinition, table: &TableExpr) -> Expr {
        let members = definition
            .members
            .iter()
            .map(|m| MemberBinding {
                name: m.name.clone(),
                expr: Expr::Column(ColumnExpr::new(table.alias, m.column_name(), m.sql_type)),
            })
            .collect();
        Expr::Entity(EntityExpr {
            entity: definition.name.clone(),
            expr: Box::new(Expr::New(NewExpr {
                type_name: Some(definition.name.clone()),
                members,
            })),
        })
    }

    fn table_column(table: &TableExpr, definition: &EntityDefinition, member: &str) -> MappingResult<ColumnExpr> {
        definition
            .members
            .iter()
            .find(|m| m.name == member)
            .map(|m| ColumnExpr::new(table.alias, m.column_name(), m.sql_type))
            .ok_or_else(|| MappingError::member_not_found(&definition.name, member))
    }

    fn key_predicate(
        table: &TableExpr,
        definition: &EntityDefinition,
        instance: &Expr,
    ) -> MappingResult<Option<Expr>> {
        let mut terms = Vec::new();
        for member in definition.members.iter().filter(|m| m.primary_key) {
            let column = Self::table_column(table, definition, &member.name)?;
            terms.push(Expr::Column(column).eq(instance.clone().member(member.name.clone())));
        }
        Ok(join_conjunction(terms))
    }
}

impl Mapper for MappingSchema {
    fn bind_table(&self, language: &dyn QueryLanguage, entity: &str) -> MappingResult<ProjectionExpr> {
        let definition = self.resolve_entity(entity)?;
        let table = self.new_table(definition);
        let projector = Self::entity_projector(definition, &table);
        let select_alias = TableAlias::new();
        let pc = project_columns(
            language,
            ProjectionAffinity::Client,
            &projector,
            &[],
            select_alias,
            &[table.alias],
        );
        debug!("MappingSchema: bound table {} as {}", definition.table, table.alias);
        Ok(ProjectionExpr::new(
            SelectExpr::new(select_alias, pc.columns, Some(Expr::Table(table)), None),
            pc.projector,
        ))
    }

    fn bind_member(
        &self,
        language: &dyn QueryLanguage,
        root: &Expr,
        entity: &str,
        member: &str,
    ) -> MappingResult<Expr> {
        let Some(association) = self.association(entity, member) else {
            let definition = self.entity(entity)?;
            if !definition.members.iter().any(|m| m.name == member) {
                return Err(MappingError::member_not_found(entity, member));
            }
            return Ok(bind_member(root, member));
        };

        let projection = self.bind_table(language, &association.target)?;
        let mut terms = Vec::new();
        for (key, related) in association.keys.iter().zip(&association.related_keys) {
            let related_expr = bind_member(&projection.projector, related);
            let key_expr = bind_member(root, key);
            terms.push(related_expr.eq(key_expr));
        }
        let where_clause = join_conjunction(terms);

        let new_alias = TableAlias::new();
        let pc = project_columns(
            language,
            ProjectionAffinity::Client,
            &projection.projector,
            &[],
            new_alias,
            &[projection.select.alias],
        );
        let aggregator = association.singleton.then_some(Aggregator::SingleOrDefault);
        debug!(
            "MappingSchema: bound association {}.{} -> {} (singleton: {})",
            entity, member, association.target, association.singleton
        );
        Ok(Expr::Projection(
            ProjectionExpr::new(
                SelectExpr::new(new_alias, pc.columns, Some(Expr::Select(*projection.select)), where_clause),
                pc.projector,
            )
            .with_aggregator(aggregator),
        ))
    }

    fn is_relationship(&self, entity: &str, member: &str) -> bool {
        self.association(entity, member).is_some()
    }

    fn is_singleton_relationship(&self, entity: &str, member: &str) -> bool {
        self.association(entity, member).map(|a| a.singleton).unwrap_or(false)
    }

    fn primary_key_members(&self, entity: &str) -> MappingResult<Vec<String>> {
        let definition = self.resolve_entity(entity)?;
        let keys: Vec<String> = definition
            .members
            .iter()
            .filter(|m| m.primary_key)
            .map(|m| m.name.clone())
            .collect();
        if keys.is_empty() {
            return Err(MappingError::NoPrimaryKey {
                entity: entity.to_string(),
            });
        }
        Ok(keys)
    }

    fn entity_expression(&self, entity: &str, table: &TableExpr) -> MappingResult<Expr> {
        Ok(Self::entity_projector(self.resolve_entity(entity)?, table))
    }

    fn insert_command(&self, entity: &str, instance: &Expr) -> MappingResult<CommandExpr> {
        let definition = self.resolve_entity(entity)?;
        let table = self.new_table(definition);
        let assignments = definition
            .members
            .iter()
            .filter(|m| !m.generated)
            .map(|m| ColumnAssignment {
                column: ColumnExpr::new(table.alias, m.column_name(), m.sql_type),
                expression: instance.clone().member(m.name.clone()),
            })
            .collect();
        Ok(CommandExpr::Insert { table, assignments })
    }

    fn update_command(&self, entity: &str, instance: &Expr) -> MappingResult<CommandExpr> {
        let definition = self.resolve_entity(entity)?;
        let table = self.new_table(definition);
        let where_clause = Self::key_predicate(&table, definition, instance)?.ok_or_else(|| {
            MappingError::NoPrimaryKey {
                entity: definition.name.clone(),
            }
        })?;
        let assignments = definition
            .members
            .iter()
            .filter(|m| !m.primary_key && !m.generated)
            .map(|m| ColumnAssignment {
                column: ColumnExpr::new(table.alias, m.column_name(), m.sql_type),
                expression: instance.clone().member(m.name.clone()),
            })
            .collect();
        Ok(CommandExpr::Update {
            table,
            where_clause: Box::new(where_clause),
            assignments,
        })
    }

    fn delete_command(&self, entity: &str, instance: Option<&Expr>) -> MappingResult<CommandExpr> {
        let definition = self.resolve_entity(entity)?;
        let table = self.new_table(definition);
        let where_clause = match instance {
            Some(instance) => Self::key_predicate(&table, definition, instance)?,
            None => None,
        };
        Ok(CommandExpr::Delete {
            table,
            where_clause: where_clause.map(Box::new),
        })
    }
}
