//! # Entity Mapping
//!
//! The compiler never looks at mapping metadata directly. It asks a
//! [`Mapper`] to bind table references and association members into relation
//! fragments, to name primary keys, and to translate entity instances into
//! column assignments for mutations.
//!
//! [`MappingSchema`] is the YAML-configured implementation.

pub mod config;
pub mod errors;
pub mod schema;

pub use config::{AssociationDefinition, EntityDefinition, MappingConfig, MemberDefinition};
pub use errors::MappingError;
pub use schema::MappingSchema;

use crate::query_compiler::language::QueryLanguage;
use crate::query_compiler::relation_expr::{CommandExpr, Expr, ProjectionExpr, TableExpr};

pub type MappingResult<T> = Result<T, MappingError>;

pub trait Mapper: Send + Sync {
    /// A projection over every row of the entity's table.
    fn bind_table(&self, language: &dyn QueryLanguage, entity: &str) -> MappingResult<ProjectionExpr>;

    /// Resolves `root.member` where `root` is an entity of type `entity`.
    /// Associations come back as a [`ProjectionExpr`] correlated to `root`;
    /// singleton associations carry a `SingleOrDefault` aggregator.
    fn bind_member(
        &self,
        language: &dyn QueryLanguage,
        root: &Expr,
        entity: &str,
        member: &str,
    ) -> MappingResult<Expr>;

    fn is_relationship(&self, entity: &str, member: &str) -> bool;

    fn is_singleton_relationship(&self, entity: &str, member: &str) -> bool;

    fn primary_key_members(&self, entity: &str) -> MappingResult<Vec<String>>;

    /// The entity projector over columns of `table`.
    fn entity_expression(&self, entity: &str, table: &TableExpr) -> MappingResult<Expr>;

    /// INSERT assigning every non-generated column from `instance` members.
    fn insert_command(&self, entity: &str, instance: &Expr) -> MappingResult<CommandExpr>;

    /// UPDATE of non-key columns, keyed on `instance`'s primary key.
    fn update_command(&self, entity: &str, instance: &Expr) -> MappingResult<CommandExpr>;

    /// DELETE keyed on `instance`'s primary key, or unfiltered without one.
    fn delete_command(&self, entity: &str, instance: Option<&Expr>) -> MappingResult<CommandExpr>;
}
