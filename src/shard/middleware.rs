//! Sharding middleware
//!
//! The per-request orchestration layer. Decides whether to shard, asks the
//! planner for a rewrite, and either evaluates the rewritten query against a
//! [`ShardedQueryable`] or forwards the original request to the next handler
//! untouched. Sharding failures never fail a request on their own: any
//! planning problem, and any query with nothing to parallelize, falls back
//! to the unsharded path.
//!
//! No state persists across requests except the injected metric handles.

use crate::config::ShardingConfig;
use crate::engine::{
    EngineError, QueryEngine, QueryHandler, QueryResponse, SeriesSource, ShardExecutor,
};
use crate::error::{Error, Result};
use crate::metrics::ShardingMetrics;
use crate::shard::planner::ShardingPlanner;
use crate::shard::queryable::ShardedQueryable;
use crate::types::QueryRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Middleware that splits queries by shard before evaluation
///
/// Generic over the next handler in the pipeline; the evaluation engine and
/// the shard executor are injected as trait objects, as are the metric
/// handles via the registry passed to [`ShardingMiddleware::new`].
pub struct ShardingMiddleware<H: QueryHandler> {
    next: Arc<H>,
    engine: Arc<dyn QueryEngine>,
    executor: Arc<dyn ShardExecutor>,
    config: ShardingConfig,
    metrics: ShardingMetrics,
}

impl<H: QueryHandler> ShardingMiddleware<H> {
    /// Create the middleware, registering its metrics with `registry`
    pub fn new(
        next: Arc<H>,
        engine: Arc<dyn QueryEngine>,
        executor: Arc<dyn ShardExecutor>,
        config: ShardingConfig,
        registry: &prometheus::Registry,
    ) -> Result<Self> {
        let metrics = ShardingMetrics::new(registry)
            .map_err(|e| Error::Internal(format!("cannot register sharding metrics: {}", e)))?;
        Ok(Self {
            next,
            engine,
            executor,
            config,
            metrics,
        })
    }

    /// The metric handles this middleware records into
    ///
    /// Handles are cheap clones sharing the underlying counters; useful for
    /// tests and for exporting alongside other registries.
    pub fn metrics_handle(&self) -> ShardingMetrics {
        self.metrics.clone()
    }

    /// Serve one request, sharded when possible, unsharded otherwise
    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse> {
        let total_shards = if request.options.total_shards > 0 {
            request.options.total_shards
        } else {
            self.config.total_shards
        };

        if self.config.sharding_disabled
            || request.options.sharding_disabled
            || total_shards <= 1
        {
            debug!(
                query = %request.query,
                "query sharding is disabled for this request"
            );
            return self.next.handle(request).await;
        }

        self.metrics.sharding_attempts.inc();

        let plan = ShardingPlanner::new(total_shards)
            .and_then(|planner| planner.plan(&request.query));

        let (rewritten, stats) = match plan {
            Err(err) => {
                // A query we cannot shard is served unsharded, whatever the
                // reason; the request succeeds or fails on that path's own
                // merits.
                warn!(
                    query = %request.query,
                    error = %err,
                    "failed to rewrite the input query into a shardable form, \
                     falling back to unsharded execution"
                );
                return self.next.handle(request).await;
            }
            Ok((_, stats)) if stats.sharded_queries() == 0 => {
                debug!(
                    query = %request.query,
                    "query has no shardable components"
                );
                return self.next.handle(request).await;
            }
            Ok(plan) => plan,
        };

        let sharded_queries = stats.sharded_queries();
        self.metrics.sharding_successes.inc();
        self.metrics.sharded_queries.inc_by(sharded_queries as u64);
        self.metrics
            .sharded_queries_per_query
            .observe(sharded_queries as f64);

        debug!(
            original = %request.query,
            rewritten = %rewritten,
            sharded_queries,
            "query has been rewritten into a shardable form"
        );

        let sharded_request = request.with_query(rewritten);
        let queryable = Arc::new(ShardedQueryable::new(
            sharded_request.clone(),
            Arc::clone(&self.executor),
            self.config.fanout_timeout(),
        ));

        let source: Arc<dyn SeriesSource> = queryable.clone();
        let data = self
            .engine
            .evaluate(&sharded_request, source)
            .await
            .map_err(map_engine_error)?;

        Ok(QueryResponse {
            data,
            headers: queryable.response_headers(),
        })
    }
}

#[async_trait]
impl<H: QueryHandler> QueryHandler for ShardingMiddleware<H> {
    async fn handle(&self, request: QueryRequest) -> Result<QueryResponse> {
        ShardingMiddleware::handle(self, request).await
    }
}

/// Map a typed engine error onto the caller-facing taxonomy
fn map_engine_error(err: EngineError) -> Error {
    match err {
        EngineError::Canceled(msg) => Error::Canceled(msg),
        EngineError::Timeout(msg) => Error::Timeout(msg),
        EngineError::Storage(msg) => Error::Storage(msg),
        EngineError::Other(msg) => Error::Internal(msg),
    }
}
