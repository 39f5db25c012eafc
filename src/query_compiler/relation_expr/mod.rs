//! # Relation AST
//!
//! One sum type, [`Expr`], covers every node the compiler works with:
//!
//! - **Scalar / client nodes**: constants, parameters, member access,
//!   operators, object construction, function calls, lambdas.
//! - **Relation nodes**: tables, selects, joins, set operations.
//! - **Relational primitives**: columns, aggregates, scalar/exists/in
//!   subqueries, row numbers, between.
//! - **Projection nodes**: client projections, client joins, entities,
//!   outer-joined wrappers, groupings.
//! - **Commands**: insert, update, delete, conditional and batch.
//!
//! Nodes are plain values. Passes never mutate a node in place, they build a
//! replacement and leave the input untouched.

use serde::{Deserialize, Serialize};

use super::alias::{ParamId, TableAlias};
use super::operator::QueryOp;

pub mod comparer;
pub mod display;
pub mod members;
pub mod visitors;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null => SqlType::Unknown,
            Value::Bool(_) => SqlType::Bool,
            Value::Int(_) => SqlType::Int,
            Value::Float(_) => SqlType::Float,
            Value::Text(_) => SqlType::Text,
            Value::List(_) => SqlType::Unknown,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Int,
    Float,
    Text,
    Bool,
    DateTime,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),
    Parameter(ParamId),
    Member(MemberAccess),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Conditional(ConditionalExpr),
    Call(FunctionCall),
    New(NewExpr),
    Lambda(Lambda),
    /// Unbound declarative operator. Only present before binding.
    Operator(Box<QueryOp>),

    Table(TableExpr),
    Column(ColumnExpr),
    Select(SelectExpr),
    Join(JoinExpr),
    SetOperation(SetOperationExpr),

    Aggregate(AggregateExpr),
    AggregateSubquery(AggregateSubqueryExpr),
    Scalar(SubqueryExpr),
    Exists(SubqueryExpr),
    InSubquery(InSubqueryExpr),
    InValues(InValuesExpr),
    IsNull(Box<Expr>),
    Between(BetweenExpr),
    RowNumber(RowNumberExpr),

    Projection(ProjectionExpr),
    ClientJoin(ClientJoinExpr),
    Entity(EntityExpr),
    OuterJoined(OuterJoinedExpr),
    Grouping(GroupingExpr),

    Command(CommandExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccess {
    pub expr: Box<Expr>,
    pub member: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalExpr {
    pub test: Box<Expr>,
    pub if_true: Box<Expr>,
    pub if_false: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    pub args: Vec<Expr>,
}

/// Client-side object construction, `new { A = .., B = .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpr {
    pub type_name: Option<String>,
    pub members: Vec<MemberBinding>,
}

impl NewExpr {
    pub fn member(&self, name: &str) -> Option<&Expr> {
        self.members.iter().find(|m| m.name == name).map(|m| &m.expr)
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<ParamId>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn param(&self, index: usize) -> Option<ParamId> {
        self.params.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableExpr {
    pub alias: TableAlias,
    pub entity: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnExpr {
    pub alias: TableAlias,
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnExpr {
    pub fn new(alias: TableAlias, name: impl Into<String>, sql_type: SqlType) -> Self {
        ColumnExpr {
            alias,
            name: name.into(),
            sql_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    pub name: String,
    pub expression: Expr,
    pub sql_type: SqlType,
}

impl ColumnDeclaration {
    pub fn new(name: impl Into<String>, expression: Expr) -> Self {
        let sql_type = expression.sql_type();
        ColumnDeclaration {
            name: name.into(),
            expression,
            sql_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Ascending,
    Descending,
}

impl OrderType {
    pub fn inverted(self) -> Self {
        match self {
            OrderType::Ascending => OrderType::Descending,
            OrderType::Descending => OrderType::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpr {
    pub order_type: OrderType,
    pub expression: Expr,
}

impl OrderExpr {
    pub fn new(order_type: OrderType, expression: Expr) -> Self {
        OrderExpr {
            order_type,
            expression,
        }
    }
}

/// The universal relation node. `from: None` is a single-row constant relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectExpr {
    pub alias: TableAlias,
    pub columns: Vec<ColumnDeclaration>,
    pub from: Option<Box<Expr>>,
    pub where_clause: Option<Box<Expr>>,
    pub order_by: Vec<OrderExpr>,
    pub group_by: Vec<Expr>,
    pub is_distinct: bool,
    pub skip: Option<Box<Expr>>,
    pub take: Option<Box<Expr>>,
    pub is_reverse: bool,
}

impl SelectExpr {
    pub fn new(
        alias: TableAlias,
        columns: Vec<ColumnDeclaration>,
        from: Option<Expr>,
        where_clause: Option<Expr>,
    ) -> Self {
        SelectExpr {
            alias,
            columns,
            from: from.map(Box::new),
            where_clause: where_clause.map(Box::new),
            order_by: Vec::new(),
            group_by: Vec::new(),
            is_distinct: false,
            skip: None,
            take: None,
            is_reverse: false,
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDeclaration>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_from(mut self, from: Option<Expr>) -> Self {
        self.from = from.map(Box::new);
        self
    }

    pub fn with_where(mut self, where_clause: Option<Expr>) -> Self {
        self.where_clause = where_clause.map(Box::new);
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderExpr>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<Expr>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_distinct(mut self, is_distinct: bool) -> Self {
        self.is_distinct = is_distinct;
        self
    }

    pub fn with_skip(mut self, skip: Option<Expr>) -> Self {
        self.skip = skip.map(Box::new);
        self
    }

    pub fn with_take(mut self, take: Option<Expr>) -> Self {
        self.take = take.map(Box::new);
        self
    }

    pub fn with_reverse(mut self, is_reverse: bool) -> Self {
        self.is_reverse = is_reverse;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDeclaration> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns `base` if unused in this select, else `base1`, `base2`, ...
    pub fn available_column_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 1;
        while self.column(&name).is_some() {
            name = format!("{}{}", base, n);
            n += 1;
        }
        name
    }

    pub fn add_column(mut self, column: ColumnDeclaration) -> Self {
        self.columns.push(column);
        self
    }

    pub fn remove_column(mut self, name: &str) -> Self {
        self.columns.retain(|c| c.name != name);
        self
    }

    /// True when this select only forwards columns with no clause of its own.
    pub fn has_no_clauses(&self) -> bool {
        self.where_clause.is_none()
            && self.order_by.is_empty()
            && self.group_by.is_empty()
            && !self.is_distinct
            && self.skip.is_none()
            && self.take.is_none()
            && !self.is_reverse
    }

    /// Wraps this select's clauses in a new inner select aliased `new_alias`,
    /// keeping this select's alias and column names on the outside.
    pub fn add_redundant_select(&self, new_alias: TableAlias) -> SelectExpr {
        let new_columns = self
            .columns
            .iter()
            .map(|d| ColumnDeclaration {
                name: d.name.clone(),
                expression: Expr::Column(ColumnExpr::new(new_alias, d.name.clone(), d.sql_type)),
                sql_type: d.sql_type,
            })
            .collect();
        let mut inner = self.clone();
        inner.alias = new_alias;
        SelectExpr::new(self.alias, new_columns, Some(Expr::Select(inner)), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Cross,
    Inner,
    LeftOuter,
    CrossApply,
    OuterApply,
}

impl JoinKind {
    pub fn is_apply(&self) -> bool {
        matches!(self, JoinKind::CrossApply | JoinKind::OuterApply)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinExpr {
    pub kind: JoinKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub condition: Option<Box<Expr>>,
}

impl JoinExpr {
    pub fn new(kind: JoinKind, left: Expr, right: Expr, condition: Option<Expr>) -> Self {
        JoinExpr {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            condition: condition.map(Box::new),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOperationKind {
    Union,
    UnionAll,
}

/// `left UNION [ALL] right`, exporting the left side's column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOperationExpr {
    pub alias: TableAlias,
    pub kind: SetOperationKind,
    pub left: Box<SelectExpr>,
    pub right: Box<SelectExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Count" => Some(AggregateKind::Count),
            "LongCount" => Some(AggregateKind::LongCount),
            "Sum" => Some(AggregateKind::Sum),
            "Min" => Some(AggregateKind::Min),
            "Max" => Some(AggregateKind::Max),
            "Average" => Some(AggregateKind::Average),
            _ => None,
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self, AggregateKind::Count | AggregateKind::LongCount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub kind: AggregateKind,
    pub argument: Option<Box<Expr>>,
    pub is_distinct: bool,
}

/// An aggregate over a group's element subquery. Carries enough to be
/// re-attached as a column of the select that owns `group_by_alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSubqueryExpr {
    pub correlation_id: u64,
    pub group_by_alias: TableAlias,
    pub aggregate_in_group_select: Box<Expr>,
    pub subquery: SubqueryExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubqueryExpr {
    pub select: Box<SelectExpr>,
}

impl SubqueryExpr {
    pub fn new(select: SelectExpr) -> Self {
        SubqueryExpr {
            select: Box::new(select),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InSubqueryExpr {
    pub expr: Box<Expr>,
    pub select: Box<SelectExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InValuesExpr {
    pub expr: Box<Expr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetweenExpr {
    pub expr: Box<Expr>,
    pub lower: Box<Expr>,
    pub upper: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowNumberExpr {
    pub order_by: Vec<OrderExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
}

impl Aggregator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "First" => Some(Aggregator::First),
            "FirstOrDefault" => Some(Aggregator::FirstOrDefault),
            "Single" => Some(Aggregator::Single),
            "SingleOrDefault" => Some(Aggregator::SingleOrDefault),
            "Last" => Some(Aggregator::Last),
            "LastOrDefault" => Some(Aggregator::LastOrDefault),
            _ => None,
        }
    }

    pub fn or_default(&self) -> bool {
        matches!(
            self,
            Aggregator::FirstOrDefault | Aggregator::SingleOrDefault | Aggregator::LastOrDefault
        )
    }

    pub fn is_last(&self) -> bool {
        matches!(self, Aggregator::Last | Aggregator::LastOrDefault)
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Aggregator::Single | Aggregator::SingleOrDefault)
    }
}

/// A runnable select plus the client expression that rebuilds values from
/// its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionExpr {
    pub select: Box<SelectExpr>,
    pub projector: Box<Expr>,
    pub aggregator: Option<Aggregator>,
}

impl ProjectionExpr {
    pub fn new(select: SelectExpr, projector: Expr) -> Self {
        ProjectionExpr {
            select: Box::new(select),
            projector: Box::new(projector),
            aggregator: None,
        }
    }

    pub fn with_aggregator(mut self, aggregator: Option<Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn is_singleton(&self) -> bool {
        self.aggregator.is_some()
    }
}

/// A sub-projection executed once as its own query and joined to the outer
/// rows in memory on `outer_key == inner_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientJoinExpr {
    pub projection: ProjectionExpr,
    pub outer_key: Vec<Expr>,
    pub inner_key: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExpr {
    pub entity: String,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuterJoinedExpr {
    pub test: Box<Expr>,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingExpr {
    pub key: Box<Expr>,
    pub group: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAssignment {
    pub column: ColumnExpr,
    pub expression: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandExpr {
    Insert {
        table: TableExpr,
        assignments: Vec<ColumnAssignment>,
    },
    Update {
        table: TableExpr,
        where_clause: Box<Expr>,
        assignments: Vec<ColumnAssignment>,
    },
    Delete {
        table: TableExpr,
        where_clause: Option<Box<Expr>>,
    },
    /// Runs `if_true` when `check` holds, else `if_false`.
    If {
        check: Box<Expr>,
        if_true: Box<CommandExpr>,
        if_false: Option<Box<CommandExpr>>,
    },
    /// One command shape executed once per item, with `item` bound to each.
    Batch {
        item: ParamId,
        items: Vec<Expr>,
        operation: Box<CommandExpr>,
    },
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Expr {
        Expr::Constant(value.into())
    }

    pub fn null() -> Expr {
        Expr::Constant(Value::Null)
    }

    pub fn column(alias: TableAlias, name: impl Into<String>, sql_type: SqlType) -> Expr {
        Expr::Column(ColumnExpr::new(alias, name, sql_type))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn not(self) -> Expr {
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Not,
            operand: Box::new(self),
        })
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn member(self, member: impl Into<String>) -> Expr {
        Expr::Member(MemberAccess {
            expr: Box::new(self),
            member: member.into(),
        })
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(Value::Null))
    }

    pub fn as_column(&self) -> Option<&ColumnExpr> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_select(&self) -> Option<&SelectExpr> {
        match self {
            Expr::Select(s) => Some(s),
            _ => None,
        }
    }

    /// Best-effort SQL type of a scalar node.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Expr::Constant(v) => v.sql_type(),
            Expr::Column(c) => c.sql_type,
            Expr::Binary(b) if b.op.is_comparison() || matches!(b.op, BinaryOp::And | BinaryOp::Or) => {
                SqlType::Bool
            }
            Expr::Binary(b) => match b.left.sql_type() {
                SqlType::Unknown => b.right.sql_type(),
                t => t,
            },
            Expr::Unary(u) if u.op == UnaryOp::Not => SqlType::Bool,
            Expr::Unary(u) => u.operand.sql_type(),
            Expr::Exists(_) | Expr::InSubquery(_) | Expr::InValues(_) | Expr::IsNull(_) | Expr::Between(_) => {
                SqlType::Bool
            }
            Expr::Aggregate(a) => match a.kind {
                AggregateKind::Count | AggregateKind::LongCount => SqlType::Int,
                AggregateKind::Average => SqlType::Float,
                _ => a.argument.as_ref().map(|e| e.sql_type()).unwrap_or_default(),
            },
            Expr::AggregateSubquery(a) => a.aggregate_in_group_select.sql_type(),
            Expr::Scalar(s) => s.select.columns.first().map(|c| c.sql_type).unwrap_or_default(),
            Expr::RowNumber(_) => SqlType::Int,
            Expr::Conditional(c) => c.if_true.sql_type(),
            _ => SqlType::Unknown,
        }
    }

    /// Relation nodes may appear in a FROM clause.
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            Expr::Table(_) | Expr::Select(_) | Expr::Join(_) | Expr::SetOperation(_)
        )
    }
}
