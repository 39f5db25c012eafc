use nom::{
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{not, opt, peek, recognize},
    error::ParseError,
    sequence::{delimited, pair, terminated},
    IResult, Parser,
};

use super::ast::Literal;
use super::errors::DslParsingError;

pub type PResult<'a, O> = IResult<&'a str, O, DslParsingError<'a>>;

pub fn ws<'a, O, E: ParseError<&'a str>, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// a letter or underscore followed by letters, digits and underscores
pub fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_identifier_char),
    ))
    .parse(input)
}

/// `word` not followed by identifier characters, so `new` does not match `newest`.
pub fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = DslParsingError<'a>> {
    terminated(tag(word), not(peek(satisfy(is_identifier_char))))
}

/// Unsigned integer or decimal literal; a leading `-` is a unary operator.
pub fn number_literal(input: &str) -> PResult<'_, Literal> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1)))).parse(input)?;
    let literal = if text.contains('.') {
        text.parse::<f64>().ok().map(Literal::Float)
    } else {
        text.parse::<i64>().ok().map(Literal::Integer)
    };
    match literal {
        Some(literal) => Ok((rest, literal)),
        None => Err(nom::Err::Failure(DslParsingError::new(input, "number out of range"))),
    }
}

/// Single- or double-quoted string with `\n`, `\t` and `\<char>` escapes.
pub fn string_literal(input: &str) -> PResult<'_, String> {
    let (body, quote) = satisfy(|c| c == '"' || c == '\'').parse(input)?;
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((&body[i + c.len_utf8()..], value)),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c => value.push(c),
        }
    }
    Err(nom::Err::Failure(DslParsingError::new(input, "unterminated string")))
}
