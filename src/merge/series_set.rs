//! Merging of per-shard series collections

use crate::chunk::ChunkSeries;

/// Merge several series collections into one, ordered by label identity
///
/// Input collections typically come one per shard result. Series present in
/// only one collection pass through; series present in several pool all their
/// chunks into one entry, to be consumed through a single
/// [`SeriesMergeIterator`](crate::merge::SeriesMergeIterator) so the evaluator
/// never observes duplicate or out-of-order points for one series.
pub fn merge_series_sets(sets: Vec<Vec<ChunkSeries>>) -> Vec<ChunkSeries> {
    let mut all: Vec<ChunkSeries> = sets.into_iter().flatten().collect();
    all.sort_by(|a, b| a.labels.cmp(&b.labels));

    let mut merged: Vec<ChunkSeries> = Vec::with_capacity(all.len());
    for series in all {
        match merged.last_mut() {
            Some(last) if last.labels == series.labels => {
                last.chunks.extend(series.chunks);
            }
            _ => merged.push(series),
        }
    }
    merged
}
