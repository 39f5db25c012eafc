use std::fmt;

/// Literal values as written in the query text.
#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Operator {
    Or,
    And,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    Coalesce,
    Not,
    Negate,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEqual => ">=",
            Operator::Addition => "+",
            Operator::Subtraction => "-",
            Operator::Multiplication => "*",
            Operator::Division => "/",
            Operator::Modulo => "%",
            Operator::Coalesce => "??",
            Operator::Not => "!",
            Operator::Negate => "-",
        };
        write!(f, "{}", s)
    }
}

/// `name = expr` inside `new { }`. `name` is `None` for projection
/// initialisers such as `new { c.City }`.
#[derive(Debug, PartialEq, Clone)]
pub struct MemberInit<'a> {
    pub name: Option<&'a str>,
    pub expression: Expression<'a>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression<'a> {
    Literal(Literal),
    Variable(&'a str),
    /// `[1, 2, 3]`
    List(Vec<Expression<'a>>),
    PropertyAccess {
        target: Box<Expression<'a>>,
        member: &'a str,
    },
    /// `target.Method(args)`
    MethodCall {
        target: Box<Expression<'a>>,
        method: &'a str,
        args: Vec<Expression<'a>>,
    },
    /// `Function(args)` with no receiver
    FunctionCall {
        name: &'a str,
        args: Vec<Expression<'a>>,
    },
    Lambda {
        params: Vec<&'a str>,
        body: Box<Expression<'a>>,
    },
    New {
        type_name: Option<&'a str>,
        members: Vec<MemberInit<'a>>,
    },
    OperatorApplication {
        operator: Operator,
        operands: Vec<Expression<'a>>,
    },
    Conditional {
        test: Box<Expression<'a>>,
        if_true: Box<Expression<'a>>,
        if_false: Box<Expression<'a>>,
    },
}
