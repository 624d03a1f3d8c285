//! Integration tests for the sharding pipeline
//!
//! Wires the middleware to an in-memory storage fixture through mock
//! collaborators — a shard executor that owns hash-partitioned slices of the
//! fixture, a minimal sum-evaluating engine, and an unsharded next handler —
//! and checks that sharded execution is transparent: same results, correct
//! fallbacks, correct metrics, correct error classification.

use async_trait::async_trait;
use prometheus::Registry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_query::chunk::{Chunk, ChunkSeries};
use strata_query::engine::{
    EngineError, EngineValue, QueryEngine, QueryHandler, QueryResponse, SampleSeries,
    SeriesSource, ShardExecutor, ShardResult,
};
use strata_query::error::{Error, Result};
use strata_query::merge::SeriesMergeIterator;
use strata_query::query::ast::{Expr, LabelMatcher};
use strata_query::query::parse_query;
use strata_query::shard::embedded::EMBEDDED_METRIC;
use strata_query::shard::{ShardSelector, ShardingMiddleware, SHARD_LABEL};
use strata_query::types::{Labels, QueryRequest, ResponseHeader, Sample};
use strata_query::ShardingConfig;

// ============================================================================
// Fixture
// ============================================================================

/// Four series of a "cpu_usage" metric with constant, exactly representable
/// values, so sums compare bit-equal regardless of addition order
fn storage() -> Arc<Vec<ChunkSeries>> {
    let mut series = Vec::new();
    for (idx, host) in ["a", "b", "c", "d"].iter().enumerate() {
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::new(i * 1_000, (idx + 1) as f64))
            .collect();
        series.push(ChunkSeries::new(
            Labels::from_pairs([("__name__", "cpu_usage"), ("host", *host)]),
            vec![Chunk::from_samples(&samples)],
        ));
    }
    Arc::new(series)
}

fn select_from_storage(
    storage: &[ChunkSeries],
    metric: &str,
    matchers: &[LabelMatcher],
) -> Result<Vec<ChunkSeries>> {
    let mut selected = Vec::new();
    for series in storage {
        if series.labels.get("__name__") != Some(metric) {
            continue;
        }
        let mut matched = true;
        for matcher in matchers {
            if matcher.name == SHARD_LABEL {
                continue;
            }
            if !matcher.matches(&series.labels)? {
                matched = false;
                break;
            }
        }
        if matched {
            selected.push(series.clone());
        }
    }
    Ok(selected)
}

/// Sum all selected series per timestamp into a single output series
fn sum_series(series: Vec<ChunkSeries>) -> Result<EngineValue> {
    let mut totals: BTreeMap<i64, f64> = BTreeMap::new();
    for entry in series {
        let samples = SeriesMergeIterator::for_series(entry)
            .collect_samples()
            .map_err(Error::Merge)?;
        for sample in samples {
            *totals.entry(sample.timestamp).or_insert(0.0) += sample.value;
        }
    }
    let samples: Vec<Sample> = totals
        .into_iter()
        .map(|(t, v)| Sample::new(t, v))
        .collect();
    Ok(EngineValue::Matrix(vec![SampleSeries::new(
        Labels::empty(),
        samples,
    )]))
}

// ============================================================================
// Mock Collaborators
// ============================================================================

/// Failure modes for the mock executor
#[derive(Clone, Copy)]
enum ExecutorFailure {
    None,
    /// Shard 1 fails with a storage error, shard 0 with an internal one
    MixedErrors,
}

/// Downstream executor owning hash-partitioned slices of the fixture
struct MockExecutor {
    storage: Arc<Vec<ChunkSeries>>,
    failure: ExecutorFailure,
    calls: AtomicUsize,
}

#[async_trait]
impl ShardExecutor for MockExecutor {
    async fn execute(&self, request: QueryRequest) -> Result<ShardResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let expr = parse_query(&request.query)?;
        let mut metric = None;
        let mut matchers = Vec::new();
        let mut shard = None;
        expr.visit_selectors(&mut |selector| {
            if selector.metric == EMBEDDED_METRIC {
                return;
            }
            metric = Some(selector.metric.clone());
            matchers = selector.matchers.clone();
            if let Some(m) = selector.matchers.iter().find(|m| m.name == SHARD_LABEL) {
                shard = Some(m.value.clone());
            }
        });
        let metric = metric
            .ok_or_else(|| Error::Internal("sub-query without a data selector".to_string()))?;
        let shard = shard
            .map(|value| ShardSelector::from_label_value(&value))
            .transpose()?;

        if let (ExecutorFailure::MixedErrors, Some(selector)) = (self.failure, shard) {
            return if selector.shard == 1 {
                Err(Error::Storage("shard 1 store unavailable".to_string()))
            } else {
                // Arrive after the storage error so recoverability, not
                // timing, decides which failure the caller sees
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Err(Error::Internal("shard 0 exploded".to_string()))
            };
        }

        let series = select_from_storage(&self.storage, &metric, &matchers)?
            .into_iter()
            .filter(|s| match shard {
                Some(selector) => selector.owns(s.labels.hash_value()),
                None => true,
            })
            .collect();

        Ok(ShardResult {
            series,
            headers: vec![ResponseHeader::new("X-Executed-Query", request.query)],
        })
    }
}

/// Minimal evaluator: understands `sum(...)` over embedded envelopes
struct MockEngine;

#[async_trait]
impl QueryEngine for MockEngine {
    async fn evaluate(
        &self,
        request: &QueryRequest,
        source: Arc<dyn SeriesSource>,
    ) -> std::result::Result<EngineValue, EngineError> {
        let expr =
            parse_query(&request.query).map_err(|e| EngineError::Other(e.to_string()))?;

        let mut envelopes = Vec::new();
        expr.visit_selectors(&mut |selector| {
            if selector.metric == EMBEDDED_METRIC {
                envelopes.push(selector.matchers.clone());
            }
        });
        if envelopes.is_empty() {
            return Err(EngineError::Other(
                "mock engine only evaluates rewritten queries".to_string(),
            ));
        }

        let mut selected = Vec::new();
        for matchers in envelopes {
            let series = source
                .select(&matchers, request.time_range())
                .await
                .map_err(to_engine_error)?;
            selected.extend(series);
        }

        sum_series(selected).map_err(to_engine_error)
    }
}

fn to_engine_error(err: Error) -> EngineError {
    match err {
        Error::Canceled(msg) => EngineError::Canceled(msg),
        Error::Timeout(msg) => EngineError::Timeout(msg),
        Error::Storage(msg) => EngineError::Storage(msg),
        other => EngineError::Other(other.to_string()),
    }
}

/// Unsharded path: evaluates `sum(metric)` straight off the fixture
struct MockHandler {
    storage: Arc<Vec<ChunkSeries>>,
    calls: AtomicUsize,
}

impl MockHandler {
    fn new(storage: Arc<Vec<ChunkSeries>>) -> Self {
        Self {
            storage,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueryHandler for MockHandler {
    async fn handle(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let expr = parse_query(&request.query)?;
        let data = match expr {
            Expr::Aggregate { expr: inner, .. } => match *inner {
                Expr::Selector(selector) => sum_series(select_from_storage(
                    &self.storage,
                    &selector.metric,
                    &selector.matchers,
                )?)?,
                _ => EngineValue::Matrix(vec![]),
            },
            _ => EngineValue::Matrix(vec![]),
        };

        Ok(QueryResponse {
            data,
            headers: vec![ResponseHeader::new("X-Path", "unsharded")],
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Pipeline {
    middleware: ShardingMiddleware<MockHandler>,
    handler: Arc<MockHandler>,
    executor: Arc<MockExecutor>,
}

fn pipeline(config: ShardingConfig, failure: ExecutorFailure) -> Pipeline {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let storage = storage();
    let handler = Arc::new(MockHandler::new(Arc::clone(&storage)));
    let executor = Arc::new(MockExecutor {
        storage,
        failure,
        calls: AtomicUsize::new(0),
    });
    let executor_dyn: Arc<dyn ShardExecutor> = executor.clone();
    let middleware = ShardingMiddleware::new(
        Arc::clone(&handler),
        Arc::new(MockEngine),
        executor_dyn,
        config,
        &Registry::new(),
    )
    .unwrap();

    Pipeline {
        middleware,
        handler,
        executor,
    }
}

fn config_with_shards(total_shards: u32) -> ShardingConfig {
    ShardingConfig {
        total_shards,
        ..ShardingConfig::default()
    }
}

fn request(query: &str) -> QueryRequest {
    QueryRequest::new(query, 0, 9_000, 1_000)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_sharded_result_matches_unsharded() {
    for shards in [2, 4] {
        let p = pipeline(config_with_shards(shards), ExecutorFailure::None);

        let sharded = p.middleware.handle(request("sum(cpu_usage)")).await.unwrap();
        let unsharded = p
            .handler
            .handle(request("sum(cpu_usage)"))
            .await
            .unwrap();

        assert_eq!(sharded.data, unsharded.data, "with {} shards", shards);
        // One executor call per shard
        assert_eq!(p.executor.calls.load(Ordering::SeqCst), shards as usize);
        // Headers from every shard call are accumulated
        assert_eq!(sharded.headers.len(), shards as usize);
        assert!(sharded
            .headers
            .iter()
            .all(|h| h.name == "X-Executed-Query"));
    }
}

#[tokio::test]
async fn test_sharded_result_matches_unsharded_with_matchers() {
    let p = pipeline(config_with_shards(2), ExecutorFailure::None);

    let query = "sum(cpu_usage{host=\"a\"})";
    let sharded = p.middleware.handle(request(query)).await.unwrap();
    let unsharded = p.handler.handle(request(query)).await.unwrap();

    assert_eq!(sharded.data, unsharded.data);
}

#[tokio::test]
async fn test_sharding_metrics_are_recorded() {
    let p = pipeline(config_with_shards(4), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    p.middleware.handle(request("sum(cpu_usage)")).await.unwrap();

    assert_eq!(metrics.sharding_attempts.get(), 1);
    assert_eq!(metrics.sharding_successes.get(), 1);
    assert_eq!(metrics.sharded_queries.get(), 4);
    assert_eq!(metrics.sharded_queries_per_query.get_sample_count(), 1);
    assert_eq!(metrics.sharded_queries_per_query.get_sample_sum(), 4.0);
}

#[tokio::test]
async fn test_disabled_request_never_attempts_sharding() {
    let p = pipeline(config_with_shards(4), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    let mut req = request("sum(cpu_usage)");
    req.options.sharding_disabled = true;
    let response = p.middleware.handle(req).await.unwrap();

    assert_eq!(response.headers, vec![ResponseHeader::new("X-Path", "unsharded")]);
    assert_eq!(p.handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.sharding_attempts.get(), 0);
}

#[tokio::test]
async fn test_single_shard_config_goes_unsharded() {
    let p = pipeline(config_with_shards(1), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    p.middleware.handle(request("sum(cpu_usage)")).await.unwrap();

    assert_eq!(p.handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.sharding_attempts.get(), 0);
}

#[tokio::test]
async fn test_request_override_takes_precedence() {
    let p = pipeline(config_with_shards(4), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    let mut req = request("sum(cpu_usage)");
    req.options.total_shards = 2;
    p.middleware.handle(req).await.unwrap();

    assert_eq!(metrics.sharded_queries.get(), 2);
    assert_eq!(p.executor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unshardable_query_falls_back() {
    let p = pipeline(config_with_shards(4), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    let response = p.middleware.handle(request("cpu_usage")).await.unwrap();

    assert_eq!(response.headers, vec![ResponseHeader::new("X-Path", "unsharded")]);
    assert_eq!(metrics.sharding_attempts.get(), 1);
    assert_eq!(metrics.sharding_successes.get(), 0);
    assert_eq!(p.executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_query_surfaces_the_unsharded_paths_error() {
    let p = pipeline(config_with_shards(4), ExecutorFailure::None);

    // Planning fails on the parse error, execution falls back, and the
    // unsharded path reports its own view of the invalid input
    let err = p.middleware.handle(request("sum(((")).await.unwrap_err();
    assert!(matches!(err, Error::BadData(_)));
    assert_eq!(p.handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shard_failure_fails_whole_request_with_recoverable_error() {
    let p = pipeline(config_with_shards(2), ExecutorFailure::MixedErrors);

    let err = p.middleware.handle(request("sum(cpu_usage)")).await.unwrap_err();
    // Storage (recoverable) must win over the concurrent internal error
    assert!(matches!(err, Error::Storage(_)), "got: {}", err);
    // The sharded attempt failing does not fall back to unsharded
    assert_eq!(p.handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_counters_accumulate_across_requests() {
    let p = pipeline(config_with_shards(2), ExecutorFailure::None);
    let metrics = p.middleware.metrics_handle();

    for _ in 0..3 {
        p.middleware.handle(request("sum(cpu_usage)")).await.unwrap();
    }

    assert_eq!(metrics.sharding_attempts.get(), 3);
    assert_eq!(metrics.sharding_successes.get(), 3);
    assert_eq!(metrics.sharded_queries.get(), 6);
}
