//! Query sharding
//!
//! Everything involved in splitting one range query across independent data
//! shards and putting the results back together:
//!
//! - [`ShardSelector`]: which slice of the series-hash space a sub-query owns
//! - [`embedded`]: the envelope that carries rewritten sub-queries inside a
//!   query the evaluator can still parse
//! - [`ShardingPlanner`]: decides shardability and rewrites the query
//! - [`ShardedQueryable`]: fans the embedded sub-queries out to the shard
//!   executor and merges the results into one data source
//! - [`ShardingMiddleware`]: the per-request orchestration with unsharded
//!   fallback
//!
//! # Data Flow
//!
//! ```text
//! Request ──▶ Middleware ──▶ Planner (rewrite, count shards)
//!                │                │
//!                │   0 shards or  │ rewritten query
//!                │   plan error   ▼
//!                │          Query engine ◀── pulls series ── ShardedQueryable
//!                │                                                 │ fan-out
//!                ▼                                                 ▼
//!          next handler                                    shard executors
//!          (unsharded)                                     (one per sub-query)
//! ```

pub mod embedded;
mod middleware;
mod planner;
mod queryable;
mod selector;

pub use middleware::ShardingMiddleware;
pub use planner::{MapperStats, ShardingPlanner};
pub use queryable::ShardedQueryable;
pub use selector::{ShardSelector, SHARD_LABEL};
