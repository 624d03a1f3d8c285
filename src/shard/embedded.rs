//! Embedded sub-query envelope
//!
//! The planner replaces each shardable subtree with an aggregation over a
//! synthetic selector whose single matcher value carries the sub-queries as a
//! JSON document:
//!
//! ```text
//! __sharded_queries__{__queries__="{\"concat\":[\"<sub-query 0>\", ...]}"}
//! ```
//!
//! The rewritten query stays parseable by the evaluator; when evaluation
//! reaches this selector, the [`ShardedQueryable`](crate::shard::ShardedQueryable)
//! recognizes it, peels the envelope open and fans the sub-queries out
//! downstream. JSON array order is preserved, so encoding is deterministic.

use crate::error::{Error, Result};
use crate::query::ast::{LabelMatcher, MatchOp, VectorSelector};
use serde::{Deserialize, Serialize};

/// Synthetic metric name marking an embedded sub-query envelope
pub const EMBEDDED_METRIC: &str = "__sharded_queries__";

/// Label name whose value carries the JSON-encoded sub-query list
pub const EMBEDDED_LABEL: &str = "__queries__";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    concat: Vec<String>,
}

/// Build the selector embedding the given sub-queries
pub fn embed_queries(queries: &[String]) -> Result<VectorSelector> {
    let envelope = Envelope {
        concat: queries.to_vec(),
    };
    let encoded = serde_json::to_string(&envelope)
        .map_err(|e| Error::Internal(format!("cannot encode embedded queries: {}", e)))?;

    Ok(VectorSelector {
        metric: EMBEDDED_METRIC.to_string(),
        matchers: vec![LabelMatcher::equal(EMBEDDED_LABEL, encoded)],
        range: None,
    })
}

/// Whether a selector is an embedded sub-query envelope
pub fn is_embedded(selector: &VectorSelector) -> bool {
    selector.metric == EMBEDDED_METRIC
}

/// Extract the sub-queries from a matcher list, if it carries an envelope
///
/// Returns `Ok(None)` when no envelope matcher is present. A present but
/// undecodable envelope is an error; it means the rewritten query was
/// corrupted between planning and execution.
pub fn extract_queries(matchers: &[LabelMatcher]) -> Result<Option<Vec<String>>> {
    let Some(matcher) = matchers
        .iter()
        .find(|m| m.name == EMBEDDED_LABEL && m.op == MatchOp::Equal)
    else {
        return Ok(None);
    };

    let envelope: Envelope = serde_json::from_str(&matcher.value)
        .map_err(|e| Error::Internal(format!("cannot decode embedded queries: {}", e)))?;
    Ok(Some(envelope.concat))
}
