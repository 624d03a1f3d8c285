//! Prometheus metrics for the sharding middleware
//!
//! Metric handles are registered against an injected
//! [`prometheus::Registry`], so each middleware instance owns its own
//! handles; nothing here is process-global. Counters are write-only from the
//! request path and are never read back for decision-making.

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, Opts, Registry,
};

/// Metric namespace shared by all handles in this crate
const NAMESPACE: &str = "strata";

/// Counters and histograms recorded by the sharding middleware
#[derive(Clone)]
pub struct ShardingMetrics {
    /// Queries the middleware attempted to rewrite into sharded form
    pub sharding_attempts: IntCounter,

    /// Queries successfully rewritten into sharded form
    pub sharding_successes: IntCounter,

    /// Total sharded sub-queries produced across all requests
    pub sharded_queries: IntCounter,

    /// Sharded sub-queries produced per rewritten query
    pub sharded_queries_per_query: Histogram,
}

impl ShardingMetrics {
    /// Create the metric handles and register them with the given registry
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let sharding_attempts = IntCounter::with_opts(
            Opts::new(
                "query_sharding_rewrites_attempted_total",
                "Total number of queries the middleware attempted to shard.",
            )
            .namespace(NAMESPACE),
        )?;
        let sharding_successes = IntCounter::with_opts(
            Opts::new(
                "query_sharding_rewrites_succeeded_total",
                "Total number of queries successfully rewritten in a shardable way.",
            )
            .namespace(NAMESPACE),
        )?;
        let sharded_queries = IntCounter::with_opts(
            Opts::new(
                "sharded_queries_total",
                "Total number of sharded sub-queries produced.",
            )
            .namespace(NAMESPACE),
        )?;
        let sharded_queries_per_query = Histogram::with_opts(
            HistogramOpts::new(
                "sharded_queries_per_query",
                "Number of sharded sub-queries a single query has been rewritten to.",
            )
            .namespace(NAMESPACE)
            .buckets(exponential_buckets(2.0, 2.0, 10)?),
        )?;

        registry.register(Box::new(sharding_attempts.clone()))?;
        registry.register(Box::new(sharding_successes.clone()))?;
        registry.register(Box::new(sharded_queries.clone()))?;
        registry.register(Box::new(sharded_queries_per_query.clone()))?;

        Ok(Self {
            sharding_attempts,
            sharding_successes,
            sharded_queries,
            sharded_queries_per_query,
        })
    }

    /// Create unregistered handles, for tests and embedding without scraping
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("registering into a fresh registry cannot collide")
    }
}
