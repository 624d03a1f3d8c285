//! Collaborator traits at the edges of the query-execution core
//!
//! The core treats the query evaluator, the downstream shard executors, and
//! the next handler in the request pipeline as black boxes behind these
//! traits. Nothing here owns a network connection or a storage engine; the
//! embedding process wires real implementations in.
//!
//! - [`QueryEngine`]: evaluates a query text against a [`SeriesSource`]
//! - [`SeriesSource`]: the pull-series-by-matchers contract the evaluator
//!   consumes; implemented by
//!   [`ShardedQueryable`](crate::shard::ShardedQueryable)
//! - [`ShardExecutor`]: runs one shard's sub-query downstream
//! - [`QueryHandler`]: the next handler in the pipeline (unsharded path)

use crate::chunk::ChunkSeries;
use crate::error::Result;
use crate::query::ast::LabelMatcher;
use crate::types::{Labels, QueryRequest, ResponseHeader, Sample, TimeRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A series of evaluated samples, as produced by the query engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    /// Series identity
    pub labels: Labels,
    /// Samples in ascending time order
    pub samples: Vec<Sample>,
}

impl SampleSeries {
    /// Create a sample series
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }
}

/// A typed evaluation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineValue {
    /// A single scalar value
    Scalar(f64),
    /// An instant vector: one sample per series
    Vector(Vec<SampleSeries>),
    /// A range vector: many samples per series
    Matrix(Vec<SampleSeries>),
}

/// A typed evaluation error, as classified by the query engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Evaluation was canceled
    #[error("query canceled: {0}")]
    Canceled(String),

    /// Evaluation exceeded its deadline
    #[error("query timed out: {0}")]
    Timeout(String),

    /// The data source failed during evaluation
    #[error("storage error during evaluation: {0}")]
    Storage(String),

    /// Any other evaluation failure
    #[error("{0}")]
    Other(String),
}

/// The response to one query request
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// The evaluated result
    pub data: EngineValue,

    /// Response headers/warnings accumulated while serving the request
    pub headers: Vec<ResponseHeader>,
}

impl QueryResponse {
    /// Create a response without headers
    pub fn new(data: EngineValue) -> Self {
        Self {
            data,
            headers: Vec::new(),
        }
    }
}

/// The result of executing one shard's sub-query downstream
#[derive(Debug, Clone, Default)]
pub struct ShardResult {
    /// The series selected by the sub-query, chunks still encoded
    pub series: Vec<ChunkSeries>,

    /// Response headers/warnings the downstream executor returned
    pub headers: Vec<ResponseHeader>,
}

/// Pull-series data source consumed by the query evaluator
#[async_trait]
pub trait SeriesSource: Send + Sync + 'static {
    /// Select the series matching the given label matchers over a time range
    ///
    /// Returned series are ordered by label identity, each identity appearing
    /// exactly once.
    async fn select(
        &self,
        matchers: &[LabelMatcher],
        range: TimeRange,
    ) -> Result<Vec<ChunkSeries>>;
}

/// The query evaluation engine
#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
    /// Evaluate the request's query text against the given data source
    async fn evaluate(
        &self,
        request: &QueryRequest,
        source: Arc<dyn SeriesSource>,
    ) -> std::result::Result<EngineValue, EngineError>;
}

/// One shard executor call: runs a single sub-query downstream
#[async_trait]
pub trait ShardExecutor: Send + Sync + 'static {
    /// Execute one shard-scoped sub-query and return its series
    async fn execute(&self, request: QueryRequest) -> Result<ShardResult>;
}

/// The next handler in the request pipeline
#[async_trait]
pub trait QueryHandler: Send + Sync + 'static {
    /// Serve the request without any involvement of this core
    async fn handle(&self, request: QueryRequest) -> Result<QueryResponse>;
}
