//! Integration tests - Compile queries end to end and run them through the
//! reference evaluator
//!
//! These tests drive the DSL, binder, rewriter pipeline and evaluator together
//! against an in-memory Northwind-style fixture.

mod fixtures;
mod pagination_tests;
mod scenario_tests;
