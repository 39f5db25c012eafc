//! relbind - relational query compiler for an object mapper
//!
//! This crate turns LINQ-style operator trees over mapped entities into
//! normalized relation trees through:
//! - A binder that lowers operators into selects, joins and client projections
//! - A fixed pipeline of rewriter passes shaped by dialect capabilities
//! - A reference evaluator that executes compiled trees over in-memory tables
//! - A text DSL and YAML configuration for the `relbind` CLI

pub mod config;
pub mod mapping;
pub mod query_compiler;
pub mod query_dsl;
