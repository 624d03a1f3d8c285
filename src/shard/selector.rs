//! Shard selectors
//!
//! A shard selector names one slice of the series-hash space: index `shard`
//! out of `of` total. It travels inside rewritten sub-queries as a reserved
//! label matcher, so a downstream executor can recompute the owned subset
//! without any side channel. For a fixed `of`, the selectors 0..of are
//! disjoint and together cover the full hash space.

use crate::error::{Error, Result};
use crate::query::ast::LabelMatcher;
use std::fmt;

/// Reserved label name carrying the shard annotation in sub-queries
pub const SHARD_LABEL: &str = "__query_shard__";

/// One shard out of a fixed total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardSelector {
    /// Shard index, in [0, of)
    pub shard: u32,

    /// Total number of shards
    pub of: u32,
}

impl ShardSelector {
    /// Create a shard selector, validating the index against the total
    pub fn new(shard: u32, of: u32) -> Result<Self> {
        if of == 0 {
            return Err(Error::Internal(
                "shard selector with zero total shards".to_string(),
            ));
        }
        if shard >= of {
            return Err(Error::Internal(format!(
                "shard index {} out of range for {} total shards",
                shard, of
            )));
        }
        Ok(Self { shard, of })
    }

    /// The textual label value form, e.g. `"1_of_4"`
    pub fn label_value(&self) -> String {
        format!("{}_of_{}", self.shard, self.of)
    }

    /// Parse the textual label value form
    pub fn from_label_value(value: &str) -> Result<Self> {
        let parse = |value: &str| -> Option<(u32, u32)> {
            let (shard, of) = value.split_once("_of_")?;
            Some((shard.parse().ok()?, of.parse().ok()?))
        };
        let (shard, of) = parse(value).ok_or_else(|| {
            Error::BadData(format!("malformed shard label value: '{}'", value))
        })?;
        Self::new(shard, of)
    }

    /// The label matcher embedding this selector into a sub-query
    pub fn matcher(&self) -> LabelMatcher {
        LabelMatcher::equal(SHARD_LABEL, self.label_value())
    }

    /// Whether a series hash falls into this shard
    pub fn owns(&self, series_hash: u64) -> bool {
        series_hash % self.of as u64 == self.shard as u64
    }
}

impl fmt::Display for ShardSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label_value())
    }
}
