//! Readable SQL-shaped rendering of relation trees.
//!
//! Used for logs, the CLI and test assertions. This is not a dialect
//! formatter: TOP/LIMIT/OFFSET are rendered uniformly and client-side nodes
//! are shown in braces.

use std::fmt::{self, Display, Formatter};

use super::{
    AggregateKind, Aggregator, BinaryOp, CommandExpr, Expr, JoinKind, OrderType, SelectExpr,
    SetOperationKind, UnaryOp, Value,
};

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::List(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Coalesce => "??",
        };
        write!(f, "{}", s)
    }
}

impl Display for JoinKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinKind::Cross => "CROSS JOIN",
            JoinKind::Inner => "INNER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
            JoinKind::CrossApply => "CROSS APPLY",
            JoinKind::OuterApply => "OUTER APPLY",
        };
        write!(f, "{}", s)
    }
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::LongCount => "COUNT_BIG",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Average => "AVG",
        };
        write!(f, "{}", s)
    }
}

impl Display for Aggregator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_order(f: &mut Formatter<'_>, order_by: &[super::OrderExpr]) -> fmt::Result {
    for (i, o) in order_by.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", o.expression)?;
        if o.order_type == OrderType::Descending {
            write!(f, " DESC")?;
        }
    }
    Ok(())
}

fn write_source(f: &mut Formatter<'_>, source: &Expr) -> fmt::Result {
    match source {
        Expr::Select(s) => write!(f, "({}) AS {}", s, s.alias),
        Expr::SetOperation(s) => write!(f, "({}) AS {}", source, s.alias),
        Expr::Table(t) => write!(f, "{} AS {}", t.name, t.alias),
        Expr::Join(j) => {
            write_source(f, &j.left)?;
            write!(f, " {} ", j.kind)?;
            write_source(f, &j.right)?;
            if let Some(c) = &j.condition {
                write!(f, " ON {}", c)?;
            }
            Ok(())
        }
        other => write!(f, "{}", other),
    }
}

impl Display for SelectExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.is_distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.columns.is_empty() {
            write!(f, "NULL")?;
        }
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} AS {}", c.expression, c.name)?;
        }
        if let Some(from) = &self.from {
            write!(f, " FROM ")?;
            write_source(f, from)?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            write_order(f, &self.order_by)?;
        }
        if let Some(s) = &self.skip {
            write!(f, " OFFSET {}", s)?;
        }
        if let Some(t) = &self.take {
            write!(f, " LIMIT {}", t)?;
        }
        if self.is_reverse {
            write!(f, " /* REVERSE */")?;
        }
        Ok(())
    }
}

impl Display for CommandExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommandExpr::Insert { table, assignments } => {
                write!(f, "INSERT INTO {} (", table.name)?;
                let names: Vec<&str> = assignments.iter().map(|a| a.column.name.as_str()).collect();
                write!(f, "{}) VALUES (", names.join(", "))?;
                let values: Vec<&Expr> = assignments.iter().map(|a| &a.expression).collect();
                write_list(f, &values)?;
                write!(f, ")")
            }
            CommandExpr::Update {
                table,
                where_clause,
                assignments,
            } => {
                write!(f, "UPDATE {} AS {} SET ", table.name, table.alias)?;
                for (i, a) in assignments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", a.column.name, a.expression)?;
                }
                write!(f, " WHERE {}", where_clause)
            }
            CommandExpr::Delete { table, where_clause } => {
                write!(f, "DELETE FROM {} AS {}", table.name, table.alias)?;
                if let Some(w) = where_clause {
                    write!(f, " WHERE {}", w)?;
                }
                Ok(())
            }
            CommandExpr::If {
                check,
                if_true,
                if_false,
            } => {
                write!(f, "IF {} BEGIN {} END", check, if_true)?;
                if let Some(other) = if_false {
                    write!(f, " ELSE BEGIN {} END", other)?;
                }
                Ok(())
            }
            CommandExpr::Batch { item, items, operation } => {
                write!(f, "BATCH {} IN [{} items] {{ {} }}", item, items.len(), operation)
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{}", v),
            Expr::Parameter(p) => write!(f, "@{}", p),
            Expr::Member(m) => write!(f, "{}.{}", m.expr, m.member),
            Expr::Binary(b) => write!(f, "({} {} {})", b.left, b.op, b.right),
            Expr::Unary(u) => match u.op {
                UnaryOp::Not => write!(f, "NOT {}", u.operand),
                UnaryOp::Negate => write!(f, "-{}", u.operand),
            },
            Expr::Conditional(c) => {
                write!(f, "CASE WHEN {} THEN {} ELSE {} END", c.test, c.if_true, c.if_false)
            }
            Expr::Call(c) => {
                write!(f, "{}(", c.function)?;
                write_list(f, &c.args)?;
                write!(f, ")")
            }
            Expr::New(n) => {
                write!(f, "{{new ")?;
                if let Some(t) = &n.type_name {
                    write!(f, "{} ", t)?;
                }
                write!(f, "{{ ")?;
                for (i, m) in n.members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", m.name, m.expr)?;
                }
                write!(f, " }}}}")
            }
            Expr::Lambda(l) => {
                let params: Vec<String> = l.params.iter().map(|p| p.to_string()).collect();
                write!(f, "({}) => {}", params.join(", "), l.body)
            }
            Expr::Operator(op) => write!(f, "{{{}(...)}}", op.name()),
            Expr::Table(t) => write!(f, "{} AS {}", t.name, t.alias),
            Expr::Column(c) => write!(f, "{}.{}", c.alias, c.name),
            Expr::Select(s) => write!(f, "{}", s),
            Expr::Join(_) => write_source(f, self),
            Expr::SetOperation(s) => {
                let op = match s.kind {
                    SetOperationKind::Union => "UNION",
                    SetOperationKind::UnionAll => "UNION ALL",
                };
                write!(f, "{} {} {}", s.left, op, s.right)
            }
            Expr::Aggregate(a) => {
                write!(f, "{}(", a.kind)?;
                if a.is_distinct {
                    write!(f, "DISTINCT ")?;
                }
                match &a.argument {
                    Some(arg) => write!(f, "{}", arg)?,
                    None => write!(f, "*")?,
                }
                write!(f, ")")
            }
            Expr::AggregateSubquery(a) => write!(f, "({})", a.subquery.select),
            Expr::Scalar(s) => write!(f, "({})", s.select),
            Expr::Exists(s) => write!(f, "EXISTS({})", s.select),
            Expr::InSubquery(i) => write!(f, "{} IN ({})", i.expr, i.select),
            Expr::InValues(i) => {
                write!(f, "{} IN (", i.expr)?;
                write_list(f, &i.values)?;
                write!(f, ")")
            }
            Expr::IsNull(e) => write!(f, "{} IS NULL", e),
            Expr::Between(b) => write!(f, "{} BETWEEN {} AND {}", b.expr, b.lower, b.upper),
            Expr::RowNumber(r) => {
                write!(f, "ROW_NUMBER() OVER (ORDER BY ")?;
                write_order(f, &r.order_by)?;
                write!(f, ")")
            }
            Expr::Projection(p) => {
                write!(f, "{{projection {}", p.projector)?;
                if let Some(a) = p.aggregator {
                    write!(f, " |> {}", a)?;
                }
                write!(f, " FROM {}}}", p.select)
            }
            Expr::ClientJoin(c) => {
                write!(f, "{{client join ON [")?;
                write_list(f, &c.outer_key)?;
                write!(f, "] = [")?;
                write_list(f, &c.inner_key)?;
                write!(f, "] {}}}", Expr::Projection(c.projection.clone()))
            }
            Expr::Entity(e) => write!(f, "{{{} {}}}", e.entity, e.expr),
            Expr::OuterJoined(o) => write!(f, "{{outer {} ? {}}}", o.test, o.expr),
            Expr::Grouping(g) => write!(f, "{{group {} => {}}}", g.key, g.group),
            Expr::Command(c) => write!(f, "{}", c),
        }
    }
}
