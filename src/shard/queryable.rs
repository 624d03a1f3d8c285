//! Sharded data source
//!
//! Bridges the query evaluator and the downstream shard executors. The
//! evaluator pulls series through the [`SeriesSource`] contract; when it
//! reaches an embedded sub-query envelope, this queryable fans the
//! sub-queries out concurrently, gathers every shard's series, and merges
//! duplicate identities so the evaluator sees one clean, ordered series set.

use crate::chunk::ChunkSeries;
use crate::engine::{SeriesSource, ShardExecutor, ShardResult};
use crate::error::{Error, Result};
use crate::merge::merge_series_sets;
use crate::query::ast::LabelMatcher;
use crate::shard::embedded::extract_queries;
use crate::types::{QueryRequest, ResponseHeader, TimeRange};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// A [`SeriesSource`] that executes embedded sub-queries across shards
///
/// One instance serves one rewritten request. Each `select` call decodes the
/// envelope in its matchers, runs one concurrent executor call per sub-query,
/// and returns the union of the shard results with duplicate series
/// identities pooled for merging.
///
/// Error policy: if any shard call fails, the whole select fails — a result
/// missing a shard's contribution would be silently wrong, which is worse
/// than an explicit error. When several shard calls fail concurrently, a
/// recoverable classification wins over a non-recoverable one.
///
/// Response headers returned by shard executors accumulate across all select
/// calls and are read once evaluation completes.
pub struct ShardedQueryable {
    request: QueryRequest,
    executor: Arc<dyn ShardExecutor>,
    fanout_timeout: Duration,
    headers: Mutex<Vec<ResponseHeader>>,
}

impl ShardedQueryable {
    /// Create a queryable bound to one rewritten request
    pub fn new(
        request: QueryRequest,
        executor: Arc<dyn ShardExecutor>,
        fanout_timeout: Duration,
    ) -> Self {
        Self {
            request,
            executor,
            fanout_timeout,
            headers: Mutex::new(Vec::new()),
        }
    }

    /// The response headers accumulated so far, deduplicated, in arrival order
    pub fn response_headers(&self) -> Vec<ResponseHeader> {
        self.headers.lock().clone()
    }

    fn record_headers(&self, headers: &[ResponseHeader]) {
        let mut accumulated = self.headers.lock();
        for header in headers {
            if !accumulated.contains(header) {
                accumulated.push(header.clone());
            }
        }
    }

    /// Run every sub-query concurrently and gather the results in input order
    async fn fan_out(&self, queries: &[String], range: TimeRange) -> Result<Vec<ShardResult>> {
        let mut tasks: JoinSet<(usize, Result<ShardResult>)> = JoinSet::new();
        for (idx, query) in queries.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let sub_request = QueryRequest {
                query: query.clone(),
                start: range.start,
                end: range.end,
                step: self.request.step,
                options: self.request.options,
            };
            tasks.spawn(async move { (idx, executor.execute(sub_request).await) });
        }

        let gather = async move {
            let mut slots: Vec<Option<ShardResult>> = queries.iter().map(|_| None).collect();
            let mut errors: Vec<Error> = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, Ok(result))) => slots[idx] = Some(result),
                    Ok((_, Err(err))) => {
                        // One failed shard fails the pull; stop the rest but
                        // keep draining already-finished tasks so concurrent
                        // failures can compete on recoverability.
                        errors.push(err);
                        tasks.abort_all();
                    }
                    Err(join_err) => {
                        if !join_err.is_cancelled() {
                            errors.push(Error::Internal(format!(
                                "shard task panicked: {}",
                                join_err
                            )));
                            tasks.abort_all();
                        }
                    }
                }
            }
            (slots, errors)
        };

        // Bounded wait: dropping the gather future on expiry tears down every
        // outstanding shard task before we return.
        let (slots, mut errors) = match tokio::time::timeout(self.fanout_timeout, gather).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "shard fan-out did not complete within {:?}",
                    self.fanout_timeout
                )));
            }
        };

        if !errors.is_empty() {
            let pick = errors
                .iter()
                .position(|e| e.is_recoverable())
                .unwrap_or(0);
            return Err(errors.swap_remove(pick));
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(result) => results.push(result),
                None => {
                    return Err(Error::Internal(
                        "shard fan-out finished without a result or an error".to_string(),
                    ))
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl SeriesSource for ShardedQueryable {
    async fn select(
        &self,
        matchers: &[LabelMatcher],
        range: TimeRange,
    ) -> Result<Vec<ChunkSeries>> {
        let queries = extract_queries(matchers)?.ok_or_else(|| {
            Error::Internal(
                "selector without embedded sub-queries reached the sharded queryable".to_string(),
            )
        })?;

        debug!(
            sub_queries = queries.len(),
            start = range.start,
            end = range.end,
            "fanning out embedded sub-queries"
        );

        let results = self.fan_out(&queries, range).await?;

        let mut sets = Vec::with_capacity(results.len());
        for result in results {
            self.record_headers(&result.headers);
            sets.push(result.series);
        }

        Ok(merge_series_sets(sets))
    }
}
