use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, one_of},
    combinator::{cut, map, not, opt, peek},
    error::context,
    multi::separated_list0,
    sequence::{delimited, preceded, terminated},
    Parser,
};

use super::ast::{Expression, Literal, MemberInit, Operator};
use super::common::{identifier, keyword, number_literal, string_literal, ws, PResult};

fn apply(operator: Operator, operands: Vec<Expression<'_>>) -> Expression<'_> {
    Expression::OperatorApplication { operator, operands }
}

pub fn parse_expression(input: &'_ str) -> PResult<'_, Expression<'_>> {
    alt((parse_lambda, parse_conditional)).parse(input)
}

/// `c => body` or `(a, b) => body`
fn parse_lambda(input: &'_ str) -> PResult<'_, Expression<'_>> {
    let (input, params) = ws(alt((
        map(identifier, |p| vec![p]),
        delimited(char('('), separated_list0(ws(char(',')), ws(identifier)), char(')')),
    )))
    .parse(input)?;
    let (input, _) = ws(tag("=>")).parse(input)?;
    let (input, body) = cut(context("lambda body", parse_expression)).parse(input)?;
    Ok((
        input,
        Expression::Lambda {
            params,
            body: Box::new(body),
        },
    ))
}

fn parse_conditional(input: &'_ str) -> PResult<'_, Expression<'_>> {
    let (input, test) = parse_coalesce(input)?;
    let (input, branches) = opt(preceded(
        ws(terminated(char('?'), not(peek(char('?'))))),
        cut((parse_expression, ws(char(':')), parse_expression)),
    ))
    .parse(input)?;
    match branches {
        Some((if_true, _, if_false)) => Ok((
            input,
            Expression::Conditional {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            },
        )),
        None => Ok((input, test)),
    }
}

/// Left-associative chain of `operand (operator operand)*`.
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expression<'a>>,
    operator: fn(&'a str) -> PResult<'a, Operator>,
) -> PResult<'a, Expression<'a>> {
    let (input, lhs) = operand(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        match ws(operator).parse(remaining_input) {
            Ok((new_input, op)) => {
                let (new_input, rhs) = cut(operand).parse(new_input)?;
                final_expression = apply(op, vec![final_expression, rhs]);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn coalesce_operator(input: &str) -> PResult<'_, Operator> {
    map(tag("??"), |_| Operator::Coalesce).parse(input)
}

fn or_operator(input: &str) -> PResult<'_, Operator> {
    map(tag("||"), |_| Operator::Or).parse(input)
}

fn and_operator(input: &str) -> PResult<'_, Operator> {
    map(tag("&&"), |_| Operator::And).parse(input)
}

fn equality_operator(input: &str) -> PResult<'_, Operator> {
    alt((
        map(tag("=="), |_| Operator::Equal),
        map(tag("!="), |_| Operator::NotEqual),
    ))
    .parse(input)
}

fn relational_operator(input: &str) -> PResult<'_, Operator> {
    alt((
        map(tag("<="), |_| Operator::LessThanEqual),
        map(tag(">="), |_| Operator::GreaterThanEqual),
        map(char('<'), |_| Operator::LessThan),
        map(char('>'), |_| Operator::GreaterThan),
    ))
    .parse(input)
}

fn additive_operator(input: &str) -> PResult<'_, Operator> {
    alt((
        map(char('+'), |_| Operator::Addition),
        map(char('-'), |_| Operator::Subtraction),
    ))
    .parse(input)
}

fn multiplicative_operator(input: &str) -> PResult<'_, Operator> {
    alt((
        map(char('*'), |_| Operator::Multiplication),
        map(char('/'), |_| Operator::Division),
        map(char('%'), |_| Operator::Modulo),
    ))
    .parse(input)
}

fn parse_coalesce(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_logical_or, coalesce_operator)
}

fn parse_logical_or(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_logical_and, or_operator)
}

fn parse_logical_and(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_equality, and_operator)
}

fn parse_equality(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_relational, equality_operator)
}

fn parse_relational(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_additive, relational_operator)
}

fn parse_additive(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_multiplicative, additive_operator)
}

fn parse_multiplicative(input: &'_ str) -> PResult<'_, Expression<'_>> {
    binary_level(input, parse_unary, multiplicative_operator)
}

fn parse_unary(input: &'_ str) -> PResult<'_, Expression<'_>> {
    alt((
        map(
            preceded(ws(terminated(char('!'), not(peek(char('='))))), parse_unary),
            |operand| apply(Operator::Not, vec![operand]),
        ),
        map(preceded(ws(char('-')), parse_unary), |operand| {
            apply(Operator::Negate, vec![operand])
        }),
        parse_postfix,
    ))
    .parse(input)
}

fn parse_arguments(input: &'_ str) -> PResult<'_, Vec<Expression<'_>>> {
    delimited(
        ws(char('(')),
        context("arguments", separated_list0(ws(char(',')), parse_expression)),
        cut(ws(char(')'))),
    )
    .parse(input)
}

/// Member access and method calls chained onto a primary expression.
fn parse_postfix(input: &'_ str) -> PResult<'_, Expression<'_>> {
    let (input, primary) = parse_primary(input)?;

    let mut remaining_input = input;
    let mut final_expression = primary;

    loop {
        let res = preceded(ws(char('.')), cut(ws(identifier))).parse(remaining_input);
        match res {
            Ok((new_input, member)) => {
                let (new_input, args) = opt(parse_arguments).parse(new_input)?;
                final_expression = match args {
                    Some(args) => Expression::MethodCall {
                        target: Box::new(final_expression),
                        method: member,
                        args,
                    },
                    None => Expression::PropertyAccess {
                        target: Box::new(final_expression),
                        member,
                    },
                };
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_primary(input: &'_ str) -> PResult<'_, Expression<'_>> {
    ws(alt((
        parse_new,
        map(number_literal, Expression::Literal),
        map(string_literal, |s| Expression::Literal(Literal::String(s))),
        map(
            delimited(
                char('['),
                separated_list0(ws(char(',')), parse_expression),
                cut(ws(char(']'))),
            ),
            Expression::List,
        ),
        delimited(char('('), parse_expression, cut(ws(char(')')))),
        parse_name,
    )))
    .parse(input)
}

/// Keyword literals, receiver-less function calls and variables.
fn parse_name(input: &'_ str) -> PResult<'_, Expression<'_>> {
    let (input, name) = identifier(input)?;
    match name {
        "null" => Ok((input, Expression::Literal(Literal::Null))),
        "true" => Ok((input, Expression::Literal(Literal::Boolean(true)))),
        "false" => Ok((input, Expression::Literal(Literal::Boolean(false)))),
        _ => {
            let (input, args) = opt(parse_arguments).parse(input)?;
            Ok((
                input,
                match args {
                    Some(args) => Expression::FunctionCall { name, args },
                    None => Expression::Variable(name),
                },
            ))
        }
    }
}

/// `new [Type] { Name = expr, c.Member, ... }`
fn parse_new(input: &'_ str) -> PResult<'_, Expression<'_>> {
    let (input, _) = keyword("new").parse(input)?;
    let (input, type_name) = opt(ws(identifier)).parse(input)?;
    let (input, members) = context(
        "new initialiser",
        cut(delimited(
            ws(char('{')),
            separated_list0(ws(char(',')), parse_member_init),
            ws(char('}')),
        )),
    )
    .parse(input)?;
    Ok((input, Expression::New { type_name, members }))
}

fn parse_member_init(input: &'_ str) -> PResult<'_, MemberInit<'_>> {
    alt((
        map(
            (
                ws(identifier),
                ws(terminated(char('='), not(peek(one_of("=>"))))),
                parse_expression,
            ),
            |(name, _, expression)| MemberInit {
                name: Some(name),
                expression,
            },
        ),
        map(parse_expression, |expression| MemberInit { name: None, expression }),
    ))
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expression<'_> {
        let (rest, expr) = parse_expression(input).unwrap();
        assert_eq!(rest.trim(), "", "unparsed: {}", rest);
        expr
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 == 7 && !x");
        let Expression::OperatorApplication { operator, operands } = expr else { panic!() };
        assert_eq!(operator, Operator::And);
        let Expression::OperatorApplication { operator, operands: eq } = &operands[0] else { panic!() };
        assert_eq!(*operator, Operator::Equal);
        let Expression::OperatorApplication { operator, .. } = &eq[0] else { panic!() };
        assert_eq!(*operator, Operator::Addition);
        assert!(matches!(
            &operands[1],
            Expression::OperatorApplication { operator: Operator::Not, .. }
        ));
    }

    #[test]
    fn test_method_chain_with_lambda() {
        let expr = parse(r#"Customers.Where(c => c.City == "London").Take(5)"#);
        let Expression::MethodCall { target, method, args } = expr else { panic!() };
        assert_eq!(method, "Take");
        assert_eq!(args, vec![Expression::Literal(Literal::Integer(5))]);
        let Expression::MethodCall { target, method, args } = *target else { panic!() };
        assert_eq!(method, "Where");
        assert_eq!(*target, Expression::Variable("Customers"));
        assert!(matches!(&args[0], Expression::Lambda { params, .. } if params == &vec!["c"]));
    }

    #[test]
    fn test_two_parameter_lambda() {
        let expr = parse("(k, g) => new { Key = k, N = g.Count() }");
        let Expression::Lambda { params, body } = expr else { panic!() };
        assert_eq!(params, vec!["k", "g"]);
        let Expression::New { type_name, members } = *body else { panic!() };
        assert_eq!(type_name, None);
        assert_eq!(members[0].name, Some("Key"));
        assert!(matches!(members[1].expression, Expression::MethodCall { method: "Count", .. }));
    }

    #[test]
    fn test_implicit_member_names_and_lists() {
        let expr = parse("new { c.City, Ids = [1, 2] }");
        let Expression::New { members, .. } = expr else { panic!() };
        assert_eq!(members[0].name, None);
        assert!(matches!(members[1].expression, Expression::List(ref items) if items.len() == 2));
    }

    #[test]
    fn test_conditional_and_coalesce() {
        let expr = parse("x.Region ?? \"none\"");
        assert!(matches!(
            expr,
            Expression::OperatorApplication { operator: Operator::Coalesce, .. }
        ));
        let expr = parse("c.Freight > 10 ? 1 : 0");
        assert!(matches!(expr, Expression::Conditional { .. }));
    }

    #[test]
    fn test_keyword_literals() {
        assert_eq!(parse("null"), Expression::Literal(Literal::Null));
        assert_eq!(parse("true"), Expression::Literal(Literal::Boolean(true)));
    }

    #[test]
    fn test_unclosed_call_is_a_failure() {
        assert!(matches!(parse_expression("Customers.Where(c => c.City"), Err(nom::Err::Failure(_))));
    }
}
