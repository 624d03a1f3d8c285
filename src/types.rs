//! Core data types used throughout the query-execution core
//!
//! This module defines the fundamental data structures shared across the
//! planner, fan-out, and merge subsystems:
//!
//! # Key Types
//!
//! - **`Sample`**: A single measurement (timestamp + value)
//! - **`Labels`**: The identity of a series, a sorted set of label pairs
//! - **`TimeRange`**: Time window for queries (start, end)
//! - **`QueryRequest`**: An immutable range-query request with per-request options
//!
//! # Example
//!
//! ```rust
//! use strata_query::types::{Labels, Sample, TimeRange};
//!
//! let labels = Labels::from_pairs([("__name__", "cpu_usage"), ("host", "web-01")]);
//! let sample = Sample::new(1_700_000_000_000, 42.5);
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1500));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single sample in a time series
///
/// The fundamental unit of query results: a millisecond timestamp paired with
/// an IEEE 754 double-precision value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds since epoch
    pub timestamp: i64,

    /// Floating-point measurement value
    pub value: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A single label pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

/// The identity of a series: a set of label pairs
///
/// Labels are kept sorted by name internally, so equality is order-independent
/// set equality and the derived ordering is a stable, total order over series
/// identities. Two chunks or streams belong to the same series iff their
/// `Labels` compare equal, regardless of the order the pairs were supplied in.
///
/// # Example
///
/// ```rust
/// use strata_query::types::Labels;
///
/// let a = Labels::from_pairs([("host", "web-01"), ("dc", "us-east")]);
/// let b = Labels::from_pairs([("dc", "us-east"), ("host", "web-01")]);
/// assert_eq!(a, b);
/// assert_eq!(a.hash_value(), b.hash_value());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels {
    labels: Vec<Label>,
}

impl Labels {
    /// Create an empty label set
    pub fn empty() -> Self {
        Self { labels: Vec::new() }
    }

    /// Build a label set from name/value pairs
    ///
    /// Pairs are sorted by name; supplying the same pairs in any order yields
    /// an identical `Labels` value.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(name, value)| Label {
                name: name.into(),
                value: value.into(),
            })
            .collect();
        labels.sort();
        Self { labels }
    }

    /// Get the value of a label by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Number of label pairs
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the label set is empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate over the label pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Return a copy with one additional label pair
    pub fn with_label(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.labels.clone();
        labels.push(Label {
            name: name.into(),
            value: value.into(),
        });
        labels.sort();
        Self { labels }
    }

    /// Calculate a consistent hash for this label set
    ///
    /// Produces the same hash regardless of the order pairs were supplied in,
    /// since labels are held sorted. Shard executors use this to decide which
    /// slice of the series-hash space a series falls into.
    pub fn hash_value(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for label in &self.labels {
            label.name.hash(&mut hasher);
            label.value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// Time range for queries (inclusive on both ends)
///
/// Represents a window [start, end] in milliseconds. Both bounds are
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range with validation
    ///
    /// Returns an error if start > end.
    pub fn new(start: i64, end: i64) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::BadData(format!(
                "invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a new time range without validation
    ///
    /// Range operations may behave unexpectedly if start > end.
    pub fn new_unchecked(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration of this range in milliseconds
    ///
    /// Uses checked subtraction; returns None on overflow.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: i64::MAX,
        }
    }
}

/// Per-request query options
///
/// Carried alongside the query text; allows a single request to override the
/// configured shard count or opt out of sharding entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Total shard count override; 0 means "use the configured default"
    pub total_shards: u32,

    /// Disable query sharding for this request
    pub sharding_disabled: bool,
}

/// An immutable range-query request
///
/// Owned by the caller for the lifetime of the request. Never mutated in
/// place; rewriting produces a new value via [`QueryRequest::with_query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query text in the query language
    pub query: String,

    /// Range start in milliseconds (inclusive)
    pub start: i64,

    /// Range end in milliseconds (inclusive)
    pub end: i64,

    /// Sample interval in milliseconds for range queries
    pub step: i64,

    /// Per-request options
    pub options: QueryOptions,
}

impl QueryRequest {
    /// Create a new request with default options
    pub fn new(query: impl Into<String>, start: i64, end: i64, step: i64) -> Self {
        Self {
            query: query.into(),
            start,
            end,
            step,
            options: QueryOptions::default(),
        }
    }

    /// Return a copy of this request with a different query text
    pub fn with_query(&self, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..self.clone()
        }
    }

    /// The request's time range
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new_unchecked(self.start, self.end)
    }
}

/// A response header or warning returned by a shard executor
///
/// Accumulated across all shard calls of a request and surfaced to the caller
/// after evaluation completes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

impl ResponseHeader {
    /// Create a new response header
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
