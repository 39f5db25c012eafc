//! Declarative operator tree.
//!
//! This is the compiler's input: a statically typed tree of LINQ-style
//! operators whose lambdas are [`Lambda`] values over [`ParamId`]s. Front-ends
//! build it with the fluent [`builder::Query`] API or the `query_dsl` parser.

use serde::{Deserialize, Serialize};

use super::relation_expr::{AggregateKind, Aggregator, Expr, Lambda, OrderType};

pub mod builder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Concat,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    /// Query root naming a mapped entity.
    Table {
        entity: String,
    },
    Where {
        source: Expr,
        predicate: Lambda,
    },
    Select {
        source: Expr,
        selector: Lambda,
    },
    SelectMany {
        source: Expr,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Expr,
        inner: Expr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupJoin {
        outer: Expr,
        inner: Expr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    OrderBy {
        source: Expr,
        key: Lambda,
        order_type: OrderType,
    },
    ThenBy {
        source: Expr,
        key: Lambda,
        order_type: OrderType,
    },
    GroupBy {
        source: Expr,
        key: Lambda,
        element: Option<Lambda>,
        result: Option<Lambda>,
    },
    Distinct {
        source: Expr,
    },
    Take {
        source: Expr,
        count: Expr,
    },
    Skip {
        source: Expr,
        count: Expr,
    },
    Reverse {
        source: Expr,
    },
    Cast {
        source: Expr,
        type_name: String,
    },
    DefaultIfEmpty {
        source: Expr,
    },
    /// First/Single/Last and their OrDefault forms.
    Element {
        source: Expr,
        aggregator: Aggregator,
        predicate: Option<Lambda>,
    },
    /// For Count/LongCount `argument` is a predicate, otherwise a selector.
    Aggregate {
        source: Expr,
        kind: AggregateKind,
        argument: Option<Lambda>,
    },
    Any {
        source: Expr,
        predicate: Option<Lambda>,
    },
    All {
        source: Expr,
        predicate: Lambda,
    },
    Contains {
        source: Expr,
        item: Expr,
    },
    SetOperation {
        kind: SetOpKind,
        left: Expr,
        right: Expr,
    },
    Insert {
        entity: String,
        instance: Expr,
    },
    Update {
        entity: String,
        instance: Expr,
        check: Option<Lambda>,
    },
    InsertOrUpdate {
        entity: String,
        instance: Expr,
        check: Option<Lambda>,
    },
    Delete {
        entity: String,
        instance: Option<Expr>,
        predicate: Option<Lambda>,
    },
    /// Applies `operation` (a one-parameter lambda) to every item.
    Batch {
        items: Vec<Expr>,
        operation: Lambda,
    },
}

impl QueryOp {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Table { .. } => "Table",
            QueryOp::Where { .. } => "Where",
            QueryOp::Select { .. } => "Select",
            QueryOp::SelectMany { .. } => "SelectMany",
            QueryOp::Join { .. } => "Join",
            QueryOp::GroupJoin { .. } => "GroupJoin",
            QueryOp::OrderBy { .. } => "OrderBy",
            QueryOp::ThenBy { .. } => "ThenBy",
            QueryOp::GroupBy { .. } => "GroupBy",
            QueryOp::Distinct { .. } => "Distinct",
            QueryOp::Take { .. } => "Take",
            QueryOp::Skip { .. } => "Skip",
            QueryOp::Reverse { .. } => "Reverse",
            QueryOp::Cast { .. } => "Cast",
            QueryOp::DefaultIfEmpty { .. } => "DefaultIfEmpty",
            QueryOp::Element { .. } => "Element",
            QueryOp::Aggregate { .. } => "Aggregate",
            QueryOp::Any { .. } => "Any",
            QueryOp::All { .. } => "All",
            QueryOp::Contains { .. } => "Contains",
            QueryOp::SetOperation { .. } => "SetOperation",
            QueryOp::Insert { .. } => "Insert",
            QueryOp::Update { .. } => "Update",
            QueryOp::InsertOrUpdate { .. } => "InsertOrUpdate",
            QueryOp::Delete { .. } => "Delete",
            QueryOp::Batch { .. } => "Batch",
        }
    }

    pub fn into_expr(self) -> Expr {
        Expr::Operator(Box::new(self))
    }
}
