//! Query Abstract Syntax Tree (AST)
//!
//! Defines the expression tree for the range-query language and its canonical
//! textual form. The sharding planner rewrites this tree; the `Display`
//! implementations are the single source of truth for rewritten query text,
//! so the same tree always renders to byte-identical output.
//!
//! # Expression Kinds
//!
//! - **Selector**: `cpu_usage{host="web-01"}` with optional range `[5m]`
//! - **Range function**: `rate(http_requests_total[5m])`
//! - **Aggregation**: `sum by (host) (cpu_usage)`
//! - **Binary arithmetic**: `(a / b)`
//! - **Number literal**: `0.5`

use crate::error::{Error, Result};
use crate::types::Labels;
use regex::Regex;
use std::fmt;
use std::time::Duration;

/// Label matching operators
///
/// Supports all four matching semantics of the query language:
/// `=`, `!=`, `=~` (regex), `!~` (regex non-match).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// Exact equality: label="value"
    Equal,
    /// Inequality: label!="value"
    NotEqual,
    /// Regex match: label=~"pattern"
    Regex,
    /// Regex non-match: label!~"pattern"
    NotRegex,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOp::Equal => write!(f, "="),
            MatchOp::NotEqual => write!(f, "!="),
            MatchOp::Regex => write!(f, "=~"),
            MatchOp::NotRegex => write!(f, "!~"),
        }
    }
}

/// A single label matcher inside a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    /// Matching operator
    pub op: MatchOp,
    /// Label name to match
    pub name: String,
    /// Value or pattern to match against
    pub value: String,
}

impl LabelMatcher {
    /// Create an equality matcher
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: MatchOp::Equal,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create a matcher with an explicit operator
    pub fn new(op: MatchOp, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether a label set satisfies this matcher
    ///
    /// An absent label reads as the empty string, so `label!="x"` and
    /// negative regexes match series that do not carry the label at all.
    /// Regex patterns are anchored to the full value.
    pub fn matches(&self, labels: &Labels) -> Result<bool> {
        let actual = labels.get(&self.name).unwrap_or("");
        match self.op {
            MatchOp::Equal => Ok(actual == self.value),
            MatchOp::NotEqual => Ok(actual != self.value),
            MatchOp::Regex | MatchOp::NotRegex => {
                let pattern = format!("^(?:{})$", self.value);
                let re = Regex::new(&pattern).map_err(|e| {
                    Error::BadData(format!("invalid regex matcher '{}': {}", self.value, e))
                })?;
                let matched = re.is_match(actual);
                Ok(if self.op == MatchOp::Regex {
                    matched
                } else {
                    !matched
                })
            }
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\"{}\"",
            self.name,
            self.op,
            escape_label_value(&self.value)
        )
    }
}

/// Escape a label value for its quoted textual form
///
/// Backslashes and double quotes are escaped; everything else passes through.
/// The parser reverses this, so values containing JSON (the embedded query
/// envelope) round-trip.
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// A vector selector: metric name, label matchers, and an optional range
///
/// A selector with a range (`cpu_usage[5m]`) selects a window of samples per
/// evaluation step; without one it selects instant vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSelector {
    /// Metric name
    pub metric: String,

    /// Label matchers, in source order
    pub matchers: Vec<LabelMatcher>,

    /// Optional range duration for matrix selection
    pub range: Option<Duration>,
}

impl VectorSelector {
    /// Create a bare selector for a metric name
    pub fn bare(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            matchers: Vec::new(),
            range: None,
        }
    }

    /// Return a copy with one additional matcher appended
    pub fn with_matcher(&self, matcher: LabelMatcher) -> Self {
        let mut matchers = self.matchers.clone();
        matchers.push(matcher);
        Self {
            metric: self.metric.clone(),
            matchers,
            range: self.range,
        }
    }

    /// Whether any matcher targets the given label name
    pub fn has_matcher(&self, name: &str) -> bool {
        self.matchers.iter().any(|m| m.name == name)
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric)?;
        if !self.matchers.is_empty() {
            write!(f, "{{")?;
            for (i, matcher) in self.matchers.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", matcher)?;
            }
            write!(f, "}}")?;
        }
        if let Some(range) = self.range {
            write!(f, "[{}]", format_duration(range))?;
        }
        Ok(())
    }
}

/// Aggregation operators over instant vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum of values per group
    Sum,
    /// Minimum value per group
    Min,
    /// Maximum value per group
    Max,
    /// Count of series per group
    Count,
    /// Arithmetic mean per group
    Avg,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOp::Sum => write!(f, "sum"),
            AggregateOp::Min => write!(f, "min"),
            AggregateOp::Max => write!(f, "max"),
            AggregateOp::Count => write!(f, "count"),
            AggregateOp::Avg => write!(f, "avg"),
        }
    }
}

/// Per-series functions over range selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFunc {
    /// Per-second rate of increase, counter resets handled
    Rate,
    /// Total increase over the range, counter resets handled
    Increase,
    /// Difference between last and first value in the range
    Delta,
}

impl fmt::Display for RangeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeFunc::Rate => write!(f, "rate"),
            RangeFunc::Increase => write!(f, "increase"),
            RangeFunc::Delta => write!(f, "delta"),
        }
    }
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
        }
    }
}

/// A query expression
///
/// The tagged-variant tree the planner walks and rewrites. Every variant has
/// a canonical textual form via `Display`; binary expressions always print
/// parenthesized so the printed form re-parses to the same tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar number literal
    Number(f64),

    /// Vector or matrix selector
    Selector(VectorSelector),

    /// Per-series function over a range selector, e.g. `rate(x[5m])`
    RangeFunction {
        /// The function applied
        func: RangeFunc,
        /// The range selector it is applied to
        arg: VectorSelector,
    },

    /// Aggregation over an inner expression
    Aggregate {
        /// Aggregation operator
        op: AggregateOp,
        /// Grouping labels (`by` clause); empty means aggregate everything
        grouping: Vec<String>,
        /// The aggregated expression
        expr: Box<Expr>,
    },

    /// Binary arithmetic between two expressions
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Visit every selector in the tree
    pub fn visit_selectors<'a>(&'a self, visit: &mut impl FnMut(&'a VectorSelector)) {
        match self {
            Expr::Number(_) => {}
            Expr::Selector(selector) => visit(selector),
            Expr::RangeFunction { arg, .. } => visit(arg),
            Expr::Aggregate { expr, .. } => expr.visit_selectors(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_selectors(visit);
                rhs.visit_selectors(visit);
            }
        }
    }

    /// Whether any selector in the tree satisfies the predicate
    pub fn any_selector(&self, mut pred: impl FnMut(&VectorSelector) -> bool) -> bool {
        let mut found = false;
        self.visit_selectors(&mut |selector| {
            if !found && pred(selector) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Selector(selector) => write!(f, "{}", selector),
            Expr::RangeFunction { func, arg } => write!(f, "{}({})", func, arg),
            Expr::Aggregate { op, grouping, expr } => {
                if grouping.is_empty() {
                    write!(f, "{}({})", op, expr)
                } else {
                    write!(f, "{} by ({}) ({})", op, grouping.join(", "), expr)
                }
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
        }
    }
}

/// Render a duration in the query language's compact form
///
/// Picks the largest unit that divides the duration evenly, so `300s`
/// renders as `5m` and the printed form is canonical.
pub fn format_duration(d: Duration) -> String {
    const UNITS: [(u128, &str); 6] = [
        (7 * 24 * 3600 * 1000, "w"),
        (24 * 3600 * 1000, "d"),
        (3600 * 1000, "h"),
        (60 * 1000, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit, suffix) in UNITS {
        if ms % unit == 0 {
            return format!("{}{}", ms / unit, suffix);
        }
    }
    unreachable!("1ms unit always divides");
}
