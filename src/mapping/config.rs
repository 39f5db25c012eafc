/// Entity mapping configuration.
///
/// Mappings are declared in YAML:
///
/// ```yaml
/// entities:
///   - name: Customer            # Entity name used by queries
///     table: Customers          # Physical table
///     members:
///       - name: CustomerID
///         column: CustomerID    # Defaults to the member name
///         sql_type: text
///         primary_key: true
///       - name: City
///         sql_type: text
///     associations:
///       - name: Orders          # Navigation member
///         target: Order
///         keys: [CustomerID]    # Members on this entity
///         related_keys: [CustomerID]  # Members on the target
///         singleton: false
/// ```
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::errors::MappingError;
use crate::query_compiler::relation_expr::SqlType;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct MappingConfig {
    #[validate(length(min = 1, message = "at least one entity must be mapped"))]
    #[validate(nested)]
    pub entities: Vec<EntityDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct EntityDefinition {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub table: String,
    #[validate(length(min = 1, message = "an entity needs at least one member"))]
    #[validate(nested)]
    pub members: Vec<MemberDefinition>,
    #[serde(default)]
    #[validate(nested)]
    pub associations: Vec<AssociationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct MemberDefinition {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub sql_type: SqlType,
    #[serde(default)]
    pub primary_key: bool,
    /// Server-generated (identity) columns are skipped on insert.
    #[serde(default)]
    pub generated: bool,
}

impl MemberDefinition {
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AssociationDefinition {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub target: String,
    #[validate(length(min = 1))]
    pub keys: Vec<String>,
    #[validate(length(min = 1))]
    pub related_keys: Vec<String>,
    #[serde(default)]
    pub singleton: bool,
}

impl MappingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MappingError> {
        let config: MappingConfig = serde_yaml::from_str(yaml).map_err(|e| MappingError::ConfigParseError {
            error: e.to_string(),
        })?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, MappingError> {
        let contents = fs::read_to_string(path).map_err(|e| MappingError::ConfigReadError {
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Field validation plus cross-entity checks.
    pub fn validate_all(&self) -> Result<(), MappingError> {
        self.validate().map_err(|e| MappingError::InvalidConfig {
            message: e.to_string(),
        })?;

        for entity in &self.entities {
            if !entity.members.iter().any(|m| m.primary_key) {
                return Err(MappingError::NoPrimaryKey {
                    entity: entity.name.clone(),
                });
            }
            for assoc in &entity.associations {
                let Some(target) = self.entities.iter().find(|e| e.name == assoc.target) else {
                    return Err(MappingError::InvalidConfig {
                        message: format!(
                            "association `{}.{}` targets unknown entity `{}`",
                            entity.name, assoc.name, assoc.target
                        ),
                    });
                };
                if assoc.keys.len() != assoc.related_keys.len() {
                    return Err(MappingError::InvalidConfig {
                        message: format!(
                            "association `{}.{}` has {} keys but {} related keys",
                            entity.name,
                            assoc.name,
                            assoc.keys.len(),
                            assoc.related_keys.len()
                        ),
                    });
                }
                for key in &assoc.keys {
                    if !entity.members.iter().any(|m| &m.name == key) {
                        return Err(MappingError::member_not_found(&entity.name, key));
                    }
                }
                for key in &assoc.related_keys {
                    if !target.members.iter().any(|m| &m.name == key) {
                        return Err(MappingError::member_not_found(&target.name, key));
                    }
                }
            }
        }
        Ok(())
    }
}
