use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

use crate::query_compiler::compile_ctx::QueryPolicy;
use crate::query_compiler::language::{DialectCapabilities, ProjectionAffinity};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {value}")]
    Parse { field: String, value: String },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Compiler configuration with validation
#[derive(Clone, Debug, Default, PartialEq, Validate, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Target dialect capabilities
    #[serde(default)]
    #[validate(nested)]
    pub dialect: DialectCapabilities,

    /// Member loading policy
    #[serde(default)]
    #[validate(nested)]
    pub policy: QueryPolicy,

    /// Default side for nodes that could run on either
    #[serde(default)]
    pub affinity: ProjectionAffinity,
}

impl CompilerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `RELBIND_DIALECT`, `RELBIND_AFFINITY` and `RELBIND_DEFERRED`
    /// through `lookup`. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("RELBIND_DIALECT") {
            config.dialect = DialectCapabilities::from_name(&value).ok_or(ConfigError::Parse {
                field: "RELBIND_DIALECT".to_string(),
                value,
            })?;
        }

        if let Some(value) = lookup("RELBIND_AFFINITY") {
            config.affinity = match value.to_ascii_lowercase().as_str() {
                "client" => ProjectionAffinity::Client,
                "server" => ProjectionAffinity::Server,
                _ => {
                    return Err(ConfigError::Parse {
                        field: "RELBIND_AFFINITY".to_string(),
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup("RELBIND_DEFERRED") {
            config.policy = QueryPolicy::deferring(
                value.split(',').map(str::trim).filter(|entry| !entry.is_empty()),
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::language::PaginationStrategy;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dialect.name, "ansi");
        assert_eq!(config.affinity, ProjectionAffinity::Client);
        assert!(config.policy.deferred.is_empty());
    }

    #[test]
    fn test_from_env_variables() {
        let config = CompilerConfig::from_lookup(lookup(&[
            ("RELBIND_DIALECT", "tsql"),
            ("RELBIND_AFFINITY", "Server"),
            ("RELBIND_DEFERRED", "Customer.Orders, Details"),
        ]))
        .unwrap();
        assert_eq!(config.dialect, DialectCapabilities::tsql());
        assert_eq!(config.affinity, ProjectionAffinity::Server);
        assert_eq!(config.policy.deferred, vec!["Customer.Orders", "Details"]);
    }

    #[test]
    fn test_unknown_dialect() {
        let result = CompilerConfig::from_lookup(lookup(&[("RELBIND_DIALECT", "cobol")]));
        assert!(matches!(result, Err(ConfigError::Parse { field, .. }) if field == "RELBIND_DIALECT"));
    }

    #[test]
    fn test_invalid_deferred_entry() {
        let result = CompilerConfig::from_lookup(lookup(&[("RELBIND_DEFERRED", "a.b.c")]));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "dialect:\n  name: jet\n  pagination: nested_top\naffinity: server\npolicy:\n  deferred: [Customer.Orders]"
        )
        .unwrap();
        let config = CompilerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.dialect.name, "jet");
        assert!(!config.dialect.supports_offset_fetch);
        assert_eq!(config.dialect.pagination, PaginationStrategy::NestedTop);
        assert_eq!(config.affinity, ProjectionAffinity::Server);
        assert!(config.policy.is_deferred(Some("Customer"), "Orders"));
    }

    #[test]
    fn test_empty_dialect_name_fails_validation() {
        let result = CompilerConfig::from_yaml_str("dialect:\n  name: \"\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = CompilerConfig::from_yaml_file("/nonexistent/relbind.yaml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
