//! Lowering of parsed DSL expressions into operator trees.
//!
//! Unbound identifiers name query roots, lambda parameters become
//! [`ParamId`]s, and method calls named after sequence operators become
//! [`QueryOp`] nodes. Any other method call is kept as a function call with
//! its receiver as the first argument.

use crate::query_compiler::alias::ParamId;
use crate::query_compiler::function_registry::is_server_function;
use crate::query_compiler::operator::{QueryOp, SetOpKind};
use crate::query_compiler::relation_expr::{
    AggregateKind, Aggregator, BinaryOp, ConditionalExpr, Expr, FunctionCall, Lambda, MemberBinding,
    NewExpr, OrderType, UnaryExpr, UnaryOp, Value,
};

use super::ast::{Expression, Literal, MemberInit, Operator};
use super::errors::DslError;

pub fn lower(expression: &Expression<'_>) -> Result<Expr, DslError> {
    Lowering::default().expr(expression)
}

#[derive(Default)]
struct Lowering<'a> {
    scopes: Vec<Vec<(&'a str, ParamId)>>,
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::String(s) => Value::Text(s.clone()),
    }
}

fn binary_op(operator: Operator) -> Option<BinaryOp> {
    Some(match operator {
        Operator::Or => BinaryOp::Or,
        Operator::And => BinaryOp::And,
        Operator::Equal => BinaryOp::Eq,
        Operator::NotEqual => BinaryOp::NotEq,
        Operator::LessThan => BinaryOp::Lt,
        Operator::LessThanEqual => BinaryOp::LtEq,
        Operator::GreaterThan => BinaryOp::Gt,
        Operator::GreaterThanEqual => BinaryOp::GtEq,
        Operator::Addition => BinaryOp::Add,
        Operator::Subtraction => BinaryOp::Subtract,
        Operator::Multiplication => BinaryOp::Multiply,
        Operator::Division => BinaryOp::Divide,
        Operator::Modulo => BinaryOp::Modulo,
        Operator::Coalesce => BinaryOp::Coalesce,
        Operator::Not | Operator::Negate => return None,
    })
}

fn order_type(method: &str) -> Option<(OrderType, bool)> {
    match method {
        "OrderBy" => Some((OrderType::Ascending, false)),
        "OrderByDescending" => Some((OrderType::Descending, false)),
        "ThenBy" => Some((OrderType::Ascending, true)),
        "ThenByDescending" => Some((OrderType::Descending, true)),
        _ => None,
    }
}

fn set_op_kind(method: &str) -> Option<SetOpKind> {
    match method {
        "Union" => Some(SetOpKind::Union),
        "Concat" => Some(SetOpKind::Concat),
        "Intersect" => Some(SetOpKind::Intersect),
        "Except" => Some(SetOpKind::Except),
        _ => None,
    }
}

/// Name a projection initialiser gets when none is written.
fn implicit_member_name<'a>(init: &MemberInit<'a>) -> Result<&'a str, DslError> {
    match (&init.name, &init.expression) {
        (Some(name), _) => Ok(*name),
        (None, Expression::PropertyAccess { member, .. }) => Ok(*member),
        (None, Expression::Variable(name)) => Ok(*name),
        _ => Err(DslError::AnonymousMember),
    }
}

fn check_arity(method: &str, args: &[Expression<'_>], range: (usize, usize), expected: &'static str) -> Result<(), DslError> {
    if args.len() < range.0 || args.len() > range.1 {
        return Err(DslError::Arity {
            operator: method.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

impl<'a> Lowering<'a> {
    fn lookup(&self, name: &str) -> Option<ParamId> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|(n, _)| *n == name)
            .map(|(_, p)| *p)
    }

    fn expr(&mut self, expression: &Expression<'a>) -> Result<Expr, DslError> {
        match expression {
            Expression::Literal(l) => Ok(Expr::Constant(literal(l))),
            Expression::Variable(name) => Ok(match self.lookup(name) {
                Some(param) => Expr::Parameter(param),
                None => QueryOp::Table {
                    entity: name.to_string(),
                }
                .into_expr(),
            }),
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.expr(item)? {
                        Expr::Constant(value) => values.push(value),
                        _ => return Err(DslError::NonConstantList),
                    }
                }
                Ok(Expr::Constant(Value::List(values)))
            }
            Expression::PropertyAccess { target, member } => Ok(self.expr(target)?.member(*member)),
            Expression::MethodCall { target, method, args } => self.method_call(target, method, args),
            Expression::FunctionCall { name, args } => {
                if !is_server_function(name, args.len()) {
                    return Err(DslError::UnknownOperator(name.to_string()));
                }
                Ok(Expr::Call(FunctionCall {
                    function: name.to_string(),
                    args: self.exprs(args)?,
                }))
            }
            Expression::Lambda { .. } => Err(DslError::UnexpectedLambda),
            Expression::New { type_name, members } => {
                let mut bindings = Vec::with_capacity(members.len());
                for init in members {
                    bindings.push(MemberBinding {
                        name: implicit_member_name(init)?.to_string(),
                        expr: self.expr(&init.expression)?,
                    });
                }
                Ok(Expr::New(NewExpr {
                    type_name: type_name.map(str::to_string),
                    members: bindings,
                }))
            }
            Expression::OperatorApplication { operator, operands } => self.operator(*operator, operands),
            Expression::Conditional { test, if_true, if_false } => Ok(Expr::Conditional(ConditionalExpr {
                test: Box::new(self.expr(test)?),
                if_true: Box::new(self.expr(if_true)?),
                if_false: Box::new(self.expr(if_false)?),
            })),
        }
    }

    fn exprs(&mut self, expressions: &[Expression<'a>]) -> Result<Vec<Expr>, DslError> {
        expressions.iter().map(|e| self.expr(e)).collect()
    }

    fn operator(&mut self, operator: Operator, operands: &[Expression<'a>]) -> Result<Expr, DslError> {
        match (operator, operands) {
            (Operator::Not, [operand]) => Ok(self.expr(operand)?.not()),
            (Operator::Negate, [operand]) => Ok(match self.expr(operand)? {
                Expr::Constant(Value::Int(i)) => Expr::constant(-i),
                Expr::Constant(Value::Float(x)) => Expr::constant(-x),
                other => Expr::Unary(UnaryExpr {
                    op: UnaryOp::Negate,
                    operand: Box::new(other),
                }),
            }),
            (op, [left, right]) => match binary_op(op) {
                Some(op) => Ok(Expr::binary(op, self.expr(left)?, self.expr(right)?)),
                None => Err(DslError::UnknownOperator(op.to_string())),
            },
            (op, _) => Err(DslError::UnknownOperator(op.to_string())),
        }
    }

    /// Lowers a lambda argument taking exactly `arity` parameters.
    fn lambda(&mut self, method: &str, expression: &Expression<'a>, arity: usize) -> Result<Lambda, DslError> {
        let Expression::Lambda { params, body } = expression else {
            return Err(DslError::ExpectedLambda {
                operator: method.to_string(),
                expected: arity,
            });
        };
        if params.len() != arity {
            return Err(DslError::ExpectedLambda {
                operator: method.to_string(),
                expected: arity,
            });
        }
        let ids: Vec<ParamId> = params.iter().map(|_| ParamId::new()).collect();
        self.scopes.push(params.iter().copied().zip(ids.iter().copied()).collect());
        let body = self.expr(body);
        self.scopes.pop();
        Ok(Lambda {
            params: ids,
            body: Box::new(body?),
        })
    }

    fn optional_lambda(
        &mut self,
        method: &str,
        args: &[Expression<'a>],
        arity: usize,
    ) -> Result<Option<Lambda>, DslError> {
        args.first().map(|arg| self.lambda(method, arg, arity)).transpose()
    }

    fn method_call(&mut self, target: &Expression<'a>, method: &str, args: &[Expression<'a>]) -> Result<Expr, DslError> {
        let source = self.expr(target)?;

        if let Some((order_type, then)) = order_type(method) {
            check_arity(method, args, (1, 1), "1")?;
            let key = self.lambda(method, &args[0], 1)?;
            let op = if then {
                QueryOp::ThenBy { source, key, order_type }
            } else {
                QueryOp::OrderBy { source, key, order_type }
            };
            return Ok(op.into_expr());
        }

        if let Some(aggregator) = Aggregator::from_name(method) {
            check_arity(method, args, (0, 1), "0 or 1")?;
            let predicate = self.optional_lambda(method, args, 1)?;
            return Ok(QueryOp::Element {
                source,
                aggregator,
                predicate,
            }
            .into_expr());
        }

        if let Some(kind) = AggregateKind::from_name(method) {
            check_arity(method, args, (0, 1), "0 or 1")?;
            let argument = self.optional_lambda(method, args, 1)?;
            return Ok(QueryOp::Aggregate { source, kind, argument }.into_expr());
        }

        if let Some(kind) = set_op_kind(method) {
            // String.Concat on a scalar receiver stays a function call
            if kind != SetOpKind::Concat || matches!(source, Expr::Operator(_)) {
                check_arity(method, args, (1, 1), "1")?;
                let right = self.expr(&args[0])?;
                return Ok(QueryOp::SetOperation {
                    kind,
                    left: source,
                    right,
                }
                .into_expr());
            }
        }

        let op = match method {
            "Where" => {
                check_arity(method, args, (1, 1), "1")?;
                QueryOp::Where {
                    source,
                    predicate: self.lambda(method, &args[0], 1)?,
                }
            }
            "Select" => {
                check_arity(method, args, (1, 1), "1")?;
                QueryOp::Select {
                    source,
                    selector: self.lambda(method, &args[0], 1)?,
                }
            }
            "SelectMany" => {
                check_arity(method, args, (1, 2), "1 or 2")?;
                let collection = self.lambda(method, &args[0], 1)?;
                let result = match args.get(1) {
                    Some(arg) => Some(self.lambda(method, arg, 2)?),
                    None => None,
                };
                QueryOp::SelectMany {
                    source,
                    collection,
                    result,
                }
            }
            "Join" | "GroupJoin" => {
                check_arity(method, args, (4, 4), "4")?;
                let inner = self.expr(&args[0])?;
                let outer_key = self.lambda(method, &args[1], 1)?;
                let inner_key = self.lambda(method, &args[2], 1)?;
                let result = self.lambda(method, &args[3], 2)?;
                if method == "Join" {
                    QueryOp::Join {
                        outer: source,
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    }
                } else {
                    QueryOp::GroupJoin {
                        outer: source,
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    }
                }
            }
            "GroupBy" => {
                check_arity(method, args, (1, 2), "1 or 2")?;
                let key = self.lambda(method, &args[0], 1)?;
                // a two-parameter second lambda is a result selector
                let (element, result) = match args.get(1) {
                    Some(arg @ Expression::Lambda { params, .. }) if params.len() == 2 => {
                        (None, Some(self.lambda(method, arg, 2)?))
                    }
                    Some(arg) => (Some(self.lambda(method, arg, 1)?), None),
                    None => (None, None),
                };
                QueryOp::GroupBy {
                    source,
                    key,
                    element,
                    result,
                }
            }
            "Distinct" | "Reverse" | "DefaultIfEmpty" => {
                check_arity(method, args, (0, 0), "0")?;
                match method {
                    "Distinct" => QueryOp::Distinct { source },
                    "Reverse" => QueryOp::Reverse { source },
                    _ => QueryOp::DefaultIfEmpty { source },
                }
            }
            "Take" | "Skip" => {
                check_arity(method, args, (1, 1), "1")?;
                let count = self.expr(&args[0])?;
                if method == "Take" {
                    QueryOp::Take { source, count }
                } else {
                    QueryOp::Skip { source, count }
                }
            }
            "Cast" => {
                check_arity(method, args, (1, 1), "1")?;
                let type_name = match &args[0] {
                    Expression::Variable(name) => name.to_string(),
                    Expression::Literal(Literal::String(name)) => name.clone(),
                    _ => {
                        return Err(DslError::Arity {
                            operator: method.to_string(),
                            expected: "a type name",
                            found: args.len(),
                        })
                    }
                };
                QueryOp::Cast { source, type_name }
            }
            "Any" => {
                check_arity(method, args, (0, 1), "0 or 1")?;
                QueryOp::Any {
                    source,
                    predicate: self.optional_lambda(method, args, 1)?,
                }
            }
            "All" => {
                check_arity(method, args, (1, 1), "1")?;
                QueryOp::All {
                    source,
                    predicate: self.lambda(method, &args[0], 1)?,
                }
            }
            "Contains" if matches!(source, Expr::Operator(_) | Expr::Constant(Value::List(_))) => {
                check_arity(method, args, (1, 1), "1")?;
                QueryOp::Contains {
                    source,
                    item: self.expr(&args[0])?,
                }
            }
            _ => {
                let mut call_args = vec![source];
                call_args.extend(self.exprs(args)?);
                return Ok(Expr::Call(FunctionCall {
                    function: method.to_string(),
                    args: call_args,
                }));
            }
        };
        Ok(op.into_expr())
    }
}
