//! Strata Query - Query-execution core for a horizontally-scaled time-series database
//!
//! This library takes a declarative range query, determines whether it can be
//! parallelized across independent data shards, rewrites it into an
//! equivalent sharded form, executes the shards concurrently against
//! downstream storage, and merges the partial, possibly overlapping results
//! back into a single ordered, deduplicated series stream.
//!
//! # Subsystems
//!
//! - **Sharding planner** ([`shard::ShardingPlanner`]): static analysis and
//!   rewrite of a query into independently executable sub-queries
//! - **Sharded queryable** ([`shard::ShardedQueryable`]): concurrent fan-out
//!   of the rewritten sub-queries, exposed as one data source
//! - **Sharding middleware** ([`shard::ShardingMiddleware`]): per-request
//!   orchestration with unsharded fallback
//! - **Series merging** ([`merge`]): deduplicated, strictly ordered sample
//!   streams out of overlapping chunks
//!
//! The query evaluator, the downstream executors, and the next pipeline
//! handler are consumed through the traits in [`engine`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod query;
pub mod shard;
pub mod types;

/// Prometheus metrics recorded by the sharding middleware
pub mod metrics;

// Re-export main types
pub use chunk::{Chunk, ChunkSeries};
pub use config::ShardingConfig;
pub use error::{Error, MergeError, Result};
pub use merge::{merge_series_sets, SeriesMergeIterator};
pub use shard::{MapperStats, ShardedQueryable, ShardingMiddleware, ShardingPlanner};
pub use types::{Labels, QueryRequest, Sample, TimeRange};
