//! Query language parser
//!
//! Parses the range-query language into the [`Expr`](crate::query::ast::Expr)
//! tree. The grammar is a small, recursive expression language:
//!
//! ```text
//! # Vector and matrix selectors
//! cpu_usage
//! cpu_usage{host="web-01", dc=~"us-.*"}
//! http_requests_total[5m]
//!
//! # Per-series range functions
//! rate(http_requests_total[5m])
//!
//! # Aggregations, with optional grouping before or after the body
//! sum(cpu_usage)
//! sum by (host) (cpu_usage)
//! max(cpu_usage) by (host)
//!
//! # Binary arithmetic with the usual precedence
//! sum(a) / sum(b)
//! ```
//!
//! The parser accepts everything the AST's `Display` implementations emit,
//! so printed expressions round-trip. Label values unescape `\"` and `\\`.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, value},
    multi::{many0, separated_list0},
    number::complete::double,
    sequence::{delimited, preceded},
    IResult, Parser,
};

use crate::error::{Error, Result};
use crate::query::ast::{
    AggregateOp, BinaryOp, Expr, LabelMatcher, MatchOp, RangeFunc, VectorSelector,
};
use std::time::Duration;

/// Parse a complete query string into an expression tree
///
/// A parse failure is a client-input error; the offending input is included
/// in the message.
pub fn parse_query(input: &str) -> Result<Expr> {
    let trimmed = input.trim();
    match parse_expr(trimmed) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                Err(Error::BadData(format!(
                    "unexpected trailing input: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(Error::BadData(format!("parse error: {}", e))),
    }
}

// ============================================================================
// Expression Grammar
// ============================================================================

/// Parse an expression: terms joined by `+` / `-`
fn parse_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0((
        delimited(multispace0, parse_add_op, multispace0),
        parse_term,
    ))
    .parse(input)?;

    Ok((input, fold_binary(first, rest)))
}

/// Parse a term: factors joined by `*` / `/`
fn parse_term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_factor(input)?;
    let (input, rest) = many0((
        delimited(multispace0, parse_mul_op, multispace0),
        parse_factor,
    ))
    .parse(input)?;

    Ok((input, fold_binary(first, rest)))
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn parse_add_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))
    .parse(input)
}

fn parse_mul_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
    ))
    .parse(input)
}

/// Parse a single factor
///
/// Order matters: aggregations and range functions are tried before plain
/// selectors so that `sum(...)` is not read as a metric named "sum", and
/// selectors before numbers so that a metric named "info" is not read as the
/// float literal `inf`. All prefixes backtrack cleanly when the following
/// token disproves them.
fn parse_factor(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_aggregate,
        parse_range_function,
        parse_paren,
        map(parse_selector, Expr::Selector),
        map(double, Expr::Number),
    ))
    .parse(input)
}

fn parse_paren(input: &str) -> IResult<&str, Expr> {
    delimited(
        (char('('), multispace0),
        parse_expr,
        (multispace0, char(')')),
    )
    .parse(input)
}

// ============================================================================
// Aggregations
// ============================================================================

/// Parse an aggregation like `sum by (host) (cpu_usage)` or `sum(x) by (host)`
fn parse_aggregate(input: &str) -> IResult<&str, Expr> {
    let (input, op) = parse_agg_op(input)?;
    let (input, _) = multispace0(input)?;
    let (input, pre_grouping) = opt(parse_by_clause).parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, inner) = parse_expr(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;

    // Trailing grouping is only legal when none was given up front
    let (input, post_grouping) = match pre_grouping {
        Some(_) => (input, None),
        None => opt(preceded(multispace0, parse_by_clause)).parse(input)?,
    };

    Ok((
        input,
        Expr::Aggregate {
            op,
            grouping: pre_grouping.or(post_grouping).unwrap_or_default(),
            expr: Box::new(inner),
        },
    ))
}

fn parse_agg_op(input: &str) -> IResult<&str, AggregateOp> {
    alt((
        value(AggregateOp::Sum, tag_no_case("sum")),
        value(AggregateOp::Min, tag_no_case("min")),
        value(AggregateOp::Max, tag_no_case("max")),
        value(AggregateOp::Count, tag_no_case("count")),
        value(AggregateOp::Avg, tag_no_case("avg")),
    ))
    .parse(input)
}

/// Parse a `by (label, ...)` clause
fn parse_by_clause(input: &str) -> IResult<&str, Vec<String>> {
    preceded(
        (tag_no_case("by"), multispace0),
        delimited(
            (char('('), multispace0),
            separated_list0(
                (multispace0, char(','), multispace0),
                map(parse_label_name, String::from),
            ),
            (multispace0, char(')')),
        ),
    )
    .parse(input)
}

// ============================================================================
// Range Functions
// ============================================================================

/// Parse a per-series range function like `rate(http_requests_total[5m])`
fn parse_range_function(input: &str) -> IResult<&str, Expr> {
    let (input, func) = parse_range_func(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, arg) = parse_selector(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;

    // The operand must carry a range; `rate(x)` is not a valid expression
    if arg.range.is_none() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((input, Expr::RangeFunction { func, arg }))
}

fn parse_range_func(input: &str) -> IResult<&str, RangeFunc> {
    alt((
        value(RangeFunc::Rate, tag_no_case("rate")),
        value(RangeFunc::Increase, tag_no_case("increase")),
        value(RangeFunc::Delta, tag_no_case("delta")),
    ))
    .parse(input)
}

// ============================================================================
// Selectors
// ============================================================================

/// Parse a vector selector: `metric_name{matchers}[range]`
fn parse_selector(input: &str) -> IResult<&str, VectorSelector> {
    let (input, metric) = parse_metric_name(input)?;
    let (input, matchers) = opt(parse_label_matchers).parse(input)?;
    let (input, range) = opt(parse_range).parse(input)?;

    Ok((
        input,
        VectorSelector {
            metric: metric.to_string(),
            matchers: matchers.unwrap_or_default(),
            range,
        },
    ))
}

fn parse_metric_name(input: &str) -> IResult<&str, &str> {
    // Must start with a letter, underscore, or colon so numeric literals are
    // never mistaken for metric names
    match input.chars().next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' => {}
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Alpha,
            )))
        }
    }
    // Dots allowed to support hierarchical metric naming (e.g. system.cpu)
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == ':' || c == '.')(input)
}

/// Parse label matchers: `{a="1", b!="2", c=~"x.*", d!~"y.*"}`
fn parse_label_matchers(input: &str) -> IResult<&str, Vec<LabelMatcher>> {
    delimited(
        (multispace0, char('{'), multispace0),
        separated_list0((multispace0, char(','), multispace0), parse_label_matcher),
        (multispace0, char('}')),
    )
    .parse(input)
}

fn parse_label_matcher(input: &str) -> IResult<&str, LabelMatcher> {
    let (input, name) = parse_label_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = alt((
        value(MatchOp::Regex, tag("=~")),
        value(MatchOp::NotRegex, tag("!~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))
    .parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_quoted_value(input)?;

    Ok((input, LabelMatcher::new(op, name, value)))
}

fn parse_label_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// Parse a quoted label value, unescaping `\"` and `\\`
///
/// Both double and single quotes are accepted; the canonical printed form
/// uses double quotes.
fn parse_quoted_value(input: &str) -> IResult<&str, String> {
    alt((parse_delimited_value::<'"'>, parse_delimited_value::<'\''>)).parse(input)
}

fn parse_delimited_value<const QUOTE: char>(input: &str) -> IResult<&str, String> {
    let (rest, _) = char(QUOTE)(input)?;

    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            q if q == QUOTE => return Ok((&rest[i + q.len_utf8()..], out)),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\'')) => out.push('\''),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            _ => out.push(c),
        }
    }

    // Unterminated string
    Err(nom::Err::Error(nom::error::Error::new(
        rest,
        nom::error::ErrorKind::Char,
    )))
}

// ============================================================================
// Durations
// ============================================================================

/// Parse a range suffix: `[5m]`
fn parse_range(input: &str) -> IResult<&str, Duration> {
    delimited(
        (multispace0, char('[')),
        parse_duration,
        (multispace0, char(']')),
    )
    .parse(input)
}

/// Parse a duration literal like `500ms`, `30s`, `5m`, `1h`, `2d`, `1w`, `1y`
fn parse_duration(input: &str) -> IResult<&str, Duration> {
    let (input, num_str) = digit1(input)?;
    let (input, unit) = alt((
        tag("ms"),
        tag("s"),
        tag("m"),
        tag("h"),
        tag("d"),
        tag("w"),
        tag("y"),
    ))
    .parse(input)?;

    let num: u64 = num_str.parse().unwrap_or(0);
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "d" => Duration::from_secs(num * 86400),
        "w" => Duration::from_secs(num * 604800),
        "y" => Duration::from_secs(num * 31536000),
        _ => Duration::from_secs(0),
    };

    Ok((input, duration))
}

// ============================================================================
// Tests
// ============================================================================
