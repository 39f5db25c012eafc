//! Shared fixtures for in-crate unit tests.

use std::sync::Arc;

use super::compile_ctx::CompileCtx;
use super::language::{DialectCapabilities, ProjectionAffinity};
use crate::mapping::MappingSchema;

pub const NORTHWIND: &str = r#"
entities:
  - name: Customer
    table: Customers
    members:
      - { name: CustomerID, sql_type: text, primary_key: true }
      - { name: CompanyName, sql_type: text }
      - { name: City, sql_type: text }
    associations:
      - { name: Orders, target: Order, keys: [CustomerID], related_keys: [CustomerID] }
  - name: Order
    table: Orders
    members:
      - { name: OrderID, sql_type: int, primary_key: true }
      - { name: CustomerID, sql_type: text }
      - { name: Freight, sql_type: float }
    associations:
      - { name: Customer, target: Customer, keys: [CustomerID], related_keys: [CustomerID], singleton: true }
"#;

pub fn schema() -> MappingSchema {
    MappingSchema::from_yaml_str(NORTHWIND).unwrap()
}

pub fn ctx() -> CompileCtx {
    CompileCtx::with_defaults(Arc::new(schema()))
}

pub fn ctx_with(dialect: DialectCapabilities, affinity: ProjectionAffinity) -> CompileCtx {
    CompileCtx::new(Arc::new(schema()), Arc::new(dialect)).with_affinity(affinity)
}
