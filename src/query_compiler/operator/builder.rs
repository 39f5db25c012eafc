//! Fluent construction of operator trees.
//!
//! ```
//! use relbind::query_compiler::operator::builder::Query;
//! use relbind::query_compiler::relation_expr::Expr;
//!
//! let london = Query::table("Customers")
//!     .filter(|c| c.member("City").eq(Expr::constant("London")))
//!     .into_expr();
//! # let _ = london;
//! ```

use crate::query_compiler::alias::ParamId;
use crate::query_compiler::relation_expr::{
    AggregateKind, Aggregator, BinaryOp, Expr, FunctionCall, Lambda, MemberBinding, NewExpr,
    OrderType, Value,
};

use super::{QueryOp, SetOpKind};

/// Builds a one-parameter lambda, minting a fresh parameter.
pub fn lambda(body: impl FnOnce(Expr) -> Expr) -> Lambda {
    let p = ParamId::new();
    Lambda {
        params: vec![p],
        body: Box::new(body(Expr::Parameter(p))),
    }
}

pub fn lambda2(body: impl FnOnce(Expr, Expr) -> Expr) -> Lambda {
    let p1 = ParamId::new();
    let p2 = ParamId::new();
    Lambda {
        params: vec![p1, p2],
        body: Box::new(body(Expr::Parameter(p1), Expr::Parameter(p2))),
    }
}

/// `new { name = expr, ... }`
pub fn new_object<S: Into<String>>(members: impl IntoIterator<Item = (S, Expr)>) -> Expr {
    Expr::New(NewExpr {
        type_name: None,
        members: members
            .into_iter()
            .map(|(name, expr)| MemberBinding {
                name: name.into(),
                expr,
            })
            .collect(),
    })
}

pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call(FunctionCall {
        function: function.into(),
        args,
    })
}

/// An in-memory constant collection usable as a Contains/Any source.
pub fn constant_list(values: impl IntoIterator<Item = Value>) -> Expr {
    Expr::Constant(Value::List(values.into_iter().collect()))
}

impl Expr {
    pub fn ne(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::NotEq, self, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::LtEq, self, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::GtEq, self, other)
    }

    pub fn plus(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn times(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Multiply, self, other)
    }
}

/// A sequence-valued operator tree under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
}

impl From<Expr> for Query {
    fn from(expr: Expr) -> Self {
        Query { expr }
    }
}

impl Query {
    pub fn table(entity: impl Into<String>) -> Self {
        QueryOp::Table {
            entity: entity.into(),
        }
        .into_expr()
        .into()
    }

    /// Treats any sequence-valued expression (e.g. `c.Orders`) as a query.
    pub fn of(expr: Expr) -> Self {
        expr.into()
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    fn wrap(op: QueryOp) -> Self {
        op.into_expr().into()
    }

    pub fn filter(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        Self::wrap(QueryOp::Where {
            source: self.expr,
            predicate: lambda(predicate),
        })
    }

    pub fn select(self, selector: impl FnOnce(Expr) -> Expr) -> Self {
        Self::wrap(QueryOp::Select {
            source: self.expr,
            selector: lambda(selector),
        })
    }

    pub fn select_many(self, collection: impl FnOnce(Expr) -> Expr) -> Self {
        Self::wrap(QueryOp::SelectMany {
            source: self.expr,
            collection: lambda(collection),
            result: None,
        })
    }

    pub fn select_many_with(
        self,
        collection: impl FnOnce(Expr) -> Expr,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Self {
        Self::wrap(QueryOp::SelectMany {
            source: self.expr,
            collection: lambda(collection),
            result: Some(lambda2(result)),
        })
    }

    pub fn join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Expr) -> Expr,
        inner_key: impl FnOnce(Expr) -> Expr,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Self {
        Self::wrap(QueryOp::Join {
            outer: self.expr,
            inner: inner.expr,
            outer_key: lambda(outer_key),
            inner_key: lambda(inner_key),
            result: lambda2(result),
        })
    }

    pub fn group_join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Expr) -> Expr,
        inner_key: impl FnOnce(Expr) -> Expr,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Self {
        Self::wrap(QueryOp::GroupJoin {
            outer: self.expr,
            inner: inner.expr,
            outer_key: lambda(outer_key),
            inner_key: lambda(inner_key),
            result: lambda2(result),
        })
    }

    pub fn order_by(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.ordered(key, OrderType::Ascending, false)
    }

    pub fn order_by_descending(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.ordered(key, OrderType::Descending, false)
    }

    pub fn then_by(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.ordered(key, OrderType::Ascending, true)
    }

    pub fn then_by_descending(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.ordered(key, OrderType::Descending, true)
    }

    fn ordered(self, key: impl FnOnce(Expr) -> Expr, order_type: OrderType, then: bool) -> Self {
        let key = lambda(key);
        if then {
            Self::wrap(QueryOp::ThenBy {
                source: self.expr,
                key,
                order_type,
            })
        } else {
            Self::wrap(QueryOp::OrderBy {
                source: self.expr,
                key,
                order_type,
            })
        }
    }

    pub fn group_by(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        Self::wrap(QueryOp::GroupBy {
            source: self.expr,
            key: lambda(key),
            element: None,
            result: None,
        })
    }

    pub fn group_by_element(
        self,
        key: impl FnOnce(Expr) -> Expr,
        element: impl FnOnce(Expr) -> Expr,
    ) -> Self {
        Self::wrap(QueryOp::GroupBy {
            source: self.expr,
            key: lambda(key),
            element: Some(lambda(element)),
            result: None,
        })
    }

    /// `GroupBy(key, (k, g) => result)`
    pub fn group_by_result(
        self,
        key: impl FnOnce(Expr) -> Expr,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Self {
        Self::wrap(QueryOp::GroupBy {
            source: self.expr,
            key: lambda(key),
            element: None,
            result: Some(lambda2(result)),
        })
    }

    pub fn distinct(self) -> Self {
        Self::wrap(QueryOp::Distinct { source: self.expr })
    }

    pub fn take(self, count: i64) -> Self {
        Self::wrap(QueryOp::Take {
            source: self.expr,
            count: Expr::constant(count),
        })
    }

    pub fn skip(self, count: i64) -> Self {
        Self::wrap(QueryOp::Skip {
            source: self.expr,
            count: Expr::constant(count),
        })
    }

    pub fn reverse(self) -> Self {
        Self::wrap(QueryOp::Reverse { source: self.expr })
    }

    pub fn cast(self, type_name: impl Into<String>) -> Self {
        Self::wrap(QueryOp::Cast {
            source: self.expr,
            type_name: type_name.into(),
        })
    }

    pub fn default_if_empty(self) -> Self {
        Self::wrap(QueryOp::DefaultIfEmpty { source: self.expr })
    }

    pub fn union(self, other: Query) -> Self {
        self.set_operation(SetOpKind::Union, other)
    }

    pub fn concat(self, other: Query) -> Self {
        self.set_operation(SetOpKind::Concat, other)
    }

    pub fn intersect(self, other: Query) -> Self {
        self.set_operation(SetOpKind::Intersect, other)
    }

    pub fn except(self, other: Query) -> Self {
        self.set_operation(SetOpKind::Except, other)
    }

    fn set_operation(self, kind: SetOpKind, other: Query) -> Self {
        Self::wrap(QueryOp::SetOperation {
            kind,
            left: self.expr,
            right: other.expr,
        })
    }

    // Terminal operators produce scalar-valued expressions.

    pub fn element(self, aggregator: Aggregator) -> Expr {
        QueryOp::Element {
            source: self.expr,
            aggregator,
            predicate: None,
        }
        .into_expr()
    }

    pub fn element_where(self, aggregator: Aggregator, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        QueryOp::Element {
            source: self.expr,
            aggregator,
            predicate: Some(lambda(predicate)),
        }
        .into_expr()
    }

    pub fn first(self) -> Expr {
        self.element(Aggregator::First)
    }

    pub fn first_or_default(self) -> Expr {
        self.element(Aggregator::FirstOrDefault)
    }

    pub fn single(self) -> Expr {
        self.element(Aggregator::Single)
    }

    pub fn last(self) -> Expr {
        self.element(Aggregator::Last)
    }

    pub fn count(self) -> Expr {
        self.aggregate(AggregateKind::Count, None)
    }

    pub fn count_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        self.aggregate(AggregateKind::Count, Some(lambda(predicate)))
    }

    pub fn sum(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.aggregate(AggregateKind::Sum, Some(lambda(selector)))
    }

    pub fn min(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.aggregate(AggregateKind::Min, Some(lambda(selector)))
    }

    pub fn max(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.aggregate(AggregateKind::Max, Some(lambda(selector)))
    }

    pub fn average(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.aggregate(AggregateKind::Average, Some(lambda(selector)))
    }

    pub fn aggregate(self, kind: AggregateKind, argument: Option<Lambda>) -> Expr {
        QueryOp::Aggregate {
            source: self.expr,
            kind,
            argument,
        }
        .into_expr()
    }

    pub fn any(self) -> Expr {
        QueryOp::Any {
            source: self.expr,
            predicate: None,
        }
        .into_expr()
    }

    pub fn any_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        QueryOp::Any {
            source: self.expr,
            predicate: Some(lambda(predicate)),
        }
        .into_expr()
    }

    pub fn all(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        QueryOp::All {
            source: self.expr,
            predicate: lambda(predicate),
        }
        .into_expr()
    }

    pub fn contains(self, item: Expr) -> Expr {
        QueryOp::Contains {
            source: self.expr,
            item,
        }
        .into_expr()
    }

    // Mutations

    pub fn insert(entity: impl Into<String>, instance: Expr) -> Expr {
        QueryOp::Insert {
            entity: entity.into(),
            instance,
        }
        .into_expr()
    }

    pub fn update(entity: impl Into<String>, instance: Expr, check: Option<Lambda>) -> Expr {
        QueryOp::Update {
            entity: entity.into(),
            instance,
            check,
        }
        .into_expr()
    }

    pub fn insert_or_update(entity: impl Into<String>, instance: Expr, check: Option<Lambda>) -> Expr {
        QueryOp::InsertOrUpdate {
            entity: entity.into(),
            instance,
            check,
        }
        .into_expr()
    }

    pub fn delete(entity: impl Into<String>, instance: Option<Expr>, predicate: Option<Lambda>) -> Expr {
        QueryOp::Delete {
            entity: entity.into(),
            instance,
            predicate,
        }
        .into_expr()
    }

    pub fn batch(items: Vec<Expr>, operation: impl FnOnce(Expr) -> Expr) -> Expr {
        QueryOp::Batch {
            items,
            operation: lambda(operation),
        }
        .into_expr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambdas_mint_distinct_parameters() {
        let a = lambda(|p| p);
        let b = lambda(|p| p);
        assert_ne!(a.params[0], b.params[0]);
    }

    #[test]
    fn test_chain_nests_sources() {
        let q = Query::table("Customers").distinct().take(3).into_expr();
        let Expr::Operator(op) = q else { panic!("expected operator") };
        let QueryOp::Take { source, .. } = *op else { panic!("expected Take") };
        let Expr::Operator(inner) = source else { panic!("expected operator") };
        assert_eq!(inner.name(), "Distinct");
    }
}
