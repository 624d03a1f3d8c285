//! Series merging
//!
//! This module turns the raw, per-shard view of a series — multiple chunks
//! that may overlap in time, arrive out of order, or duplicate one another —
//! into the single, strictly time-ordered sample stream the query evaluator
//! expects.
//!
//! Two layers:
//!
//! - [`SeriesMergeIterator`]: merges the chunk list of one series into a
//!   forward-only, seekable, deduplicated sample stream.
//! - [`merge_series_sets`]: merges several identity-ordered series
//!   collections (one per shard result) into one, pooling the chunks of
//!   series that appear in more than one collection.
//!
//! The observable stream of a merge iterator is a pure function of its chunk
//! set: consuming it with `next`, with `seek`, or with any mix of the two
//! yields the same samples.

mod iterator;
mod series_set;

pub use iterator::SeriesMergeIterator;
pub use series_set::merge_series_sets;
