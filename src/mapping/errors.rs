//! # Mapping Error Types
//!
//! Errors raised by the entity mapping layer, either while loading mapping
//! metadata or while the compiler asks it to bind tables and members.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("No mapping found for entity `{entity}`")]
    EntityNotFound { entity: String },
    #[error("Entity `{entity}` has no mapped member `{member}`")]
    MemberNotFound { entity: String, member: String },
    #[error("Member `{member}` of `{entity}` is not a relationship")]
    NotARelationship { entity: String, member: String },
    #[error("Entity `{entity}` has no primary key members")]
    NoPrimaryKey { entity: String },
    #[error("Failed to read mapping file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse mapping: {error}")]
    ConfigParseError { error: String },
    #[error("Invalid mapping: {message}")]
    InvalidConfig { message: String },
}

impl MappingError {
    pub fn entity_not_found(entity: &str) -> Self {
        MappingError::EntityNotFound {
            entity: entity.to_string(),
        }
    }

    pub fn member_not_found(entity: &str, member: &str) -> Self {
        MappingError::MemberNotFound {
            entity: entity.to_string(),
            member: member.to_string(),
        }
    }
}
