//! Compilation context.
//!
//! [`CompileCtx`] carries everything a compilation needs besides the tree:
//! - the [`Mapper`] collaborator
//! - the dialect ([`QueryLanguage`])
//! - the [`QueryPolicy`] and default [`ProjectionAffinity`]
//! - a record of which rewriter passes changed the tree
//!
//! Contexts are cheap to clone (shared `Arc`s) and never shared mutably
//! between compilations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::language::{DialectCapabilities, ProjectionAffinity, QueryLanguage};
use super::rewriter::errors::Pass;
use crate::config::CompilerConfig;
use crate::mapping::Mapper;

/// Loading policy for association members.
///
/// Entries are either `Member` or `Entity.Member`. A nested collection
/// projected under a deferred member is always fetched as a separate,
/// key-joined query instead of being joined on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct QueryPolicy {
    #[serde(default)]
    #[validate(custom(function = "validate_deferred"))]
    pub deferred: Vec<String>,
}

fn validate_deferred(entries: &[String]) -> Result<(), validator::ValidationError> {
    if entries.iter().any(|e| e.trim().is_empty() || e.split('.').count() > 2) {
        return Err(validator::ValidationError::new("deferred_member_format"));
    }
    Ok(())
}

impl QueryPolicy {
    pub fn deferring<S: Into<String>>(members: impl IntoIterator<Item = S>) -> Self {
        QueryPolicy {
            deferred: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_deferred(&self, entity: Option<&str>, member: &str) -> bool {
        self.deferred.iter().any(|entry| match entry.split_once('.') {
            Some((e, m)) => m == member && entity == Some(e),
            None => entry == member,
        })
    }
}

#[derive(Clone)]
pub struct CompileCtx {
    mapper: Arc<dyn Mapper>,
    language: Arc<dyn QueryLanguage>,
    policy: QueryPolicy,
    affinity: ProjectionAffinity,
    transformed_passes: Vec<Pass>,
}

impl fmt::Debug for CompileCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileCtx")
            .field("language", &self.language)
            .field("policy", &self.policy)
            .field("affinity", &self.affinity)
            .field("transformed_passes", &self.transformed_passes)
            .finish()
    }
}

impl CompileCtx {
    pub fn new(mapper: Arc<dyn Mapper>, language: Arc<dyn QueryLanguage>) -> Self {
        CompileCtx {
            mapper,
            language,
            policy: QueryPolicy::default(),
            affinity: ProjectionAffinity::Client,
            transformed_passes: Vec::new(),
        }
    }

    pub fn from_config(mapper: Arc<dyn Mapper>, config: &CompilerConfig) -> Self {
        CompileCtx::new(mapper, Arc::new(config.dialect.clone()))
            .with_policy(config.policy.clone())
            .with_affinity(config.affinity)
    }

    /// ANSI dialect, client affinity, no deferred members.
    pub fn with_defaults(mapper: Arc<dyn Mapper>) -> Self {
        CompileCtx::new(mapper, Arc::new(DialectCapabilities::ansi()))
    }

    pub fn with_policy(mut self, policy: QueryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_affinity(mut self, affinity: ProjectionAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    pub fn language(&self) -> &dyn QueryLanguage {
        self.language.as_ref()
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    pub fn affinity(&self) -> ProjectionAffinity {
        self.affinity
    }

    pub fn record_transformed(&mut self, pass: Pass) {
        self.transformed_passes.push(pass);
    }

    /// Passes that changed the tree in the last compilation, in run order.
    pub fn transformed_passes(&self) -> &[Pass] {
        &self.transformed_passes
    }

    pub fn reset_trace(&mut self) {
        self.transformed_passes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_matching() {
        let policy = QueryPolicy::deferring(["Customer.Orders", "Details"]);
        assert!(policy.is_deferred(Some("Customer"), "Orders"));
        assert!(!policy.is_deferred(Some("Supplier"), "Orders"));
        assert!(!policy.is_deferred(None, "Orders"));
        assert!(policy.is_deferred(None, "Details"));
    }

    #[test]
    fn test_policy_validation() {
        assert!(QueryPolicy::deferring(["a.b.c"]).validate().is_err());
        assert!(QueryPolicy::deferring(["Orders"]).validate().is_ok());
    }
}
