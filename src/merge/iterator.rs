//! Chunk-merging sample iterator for one series

use crate::chunk::{Chunk, ChunkSeries};
use crate::error::MergeError;
use crate::types::{Labels, Sample};

/// A forward-only, seekable iterator over the merged samples of one series
///
/// Constructed from an unordered list of chunks. Chunks are processed in
/// `(min_time, max_time)` ascending order, so a chunk nested inside another's
/// range and starting at the same time is consumed first. One decode cursor
/// per chunk is opened lazily, indexed by position in the sorted list, which
/// lets `seek` skip past chunks without ever decoding them.
///
/// Invariants:
///
/// - Yielded timestamps are strictly increasing. Once a timestamp T has been
///   yielded, points with timestamp <= T from later-processed chunks are
///   silently skipped, however many chunks overlap or duplicate each other.
/// - A chunk that decodes to zero points contributes nothing and is neither
///   an error nor the end of the series.
/// - A chunk that fails to decode is terminal: the error (carrying the series
///   identity) is reported through [`err`](SeriesMergeIterator::err) and all
///   subsequent `next`/`seek` calls return false.
/// - Chunk time bounds are trusted to cover their samples; `seek` uses them
///   to skip whole chunks.
///
/// # Example
///
/// ```rust
/// use strata_query::chunk::Chunk;
/// use strata_query::merge::SeriesMergeIterator;
/// use strata_query::types::{Labels, Sample};
///
/// let chunk = Chunk::from_samples(&[Sample::new(1000, 1.0), Sample::new(2000, 2.0)]);
/// let mut it = SeriesMergeIterator::new(Labels::from_pairs([("foo", "bar")]), vec![chunk]);
///
/// assert!(it.next());
/// assert_eq!(it.at().unwrap().timestamp, 1000);
/// assert!(it.next());
/// assert_eq!(it.at().unwrap().timestamp, 2000);
/// assert!(!it.next());
/// assert!(it.err().is_none());
/// ```
pub struct SeriesMergeIterator {
    labels: Labels,
    chunks: Vec<Chunk>,
    cursors: Vec<Option<ChunkCursor>>,
    current: usize,
    last_timestamp: i64,
    sample: Option<Sample>,
    error: Option<MergeError>,
}

impl SeriesMergeIterator {
    /// Create a merge iterator over a series' chunks
    ///
    /// The chunk list may be in any order and may contain overlapping or
    /// duplicated chunks.
    pub fn new(labels: Labels, mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by(|a, b| {
            a.min_time
                .cmp(&b.min_time)
                .then(a.max_time.cmp(&b.max_time))
        });
        let cursors = chunks.iter().map(|_| None).collect();

        Self {
            labels,
            chunks,
            cursors,
            current: 0,
            last_timestamp: i64::MIN,
            sample: None,
            error: None,
        }
    }

    /// Create a merge iterator for a series value
    pub fn for_series(series: ChunkSeries) -> Self {
        Self::new(series.labels, series.chunks)
    }

    /// Identity of the series being merged
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Advance to the next sample, strictly after any previously yielded one
    ///
    /// Returns true iff a new sample is current.
    pub fn next(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }

        while self.current < self.chunks.len() {
            let last = self.last_timestamp;
            let cursor = match self.cursor(self.current) {
                Ok(cursor) => cursor,
                Err(err) => {
                    self.fail(err);
                    return false;
                }
            };

            // Skip points already covered by an earlier chunk
            let mut found = None;
            while let Some(sample) = cursor.next() {
                if sample.timestamp > last {
                    found = Some(sample);
                    break;
                }
            }

            if let Some(sample) = found {
                self.last_timestamp = sample.timestamp;
                self.sample = Some(sample);
                return true;
            }

            // Chunk exhausted (possibly empty), move on
            self.current += 1;
        }

        self.sample = None;
        false
    }

    /// Advance to the first sample with timestamp >= t
    ///
    /// If the current sample already satisfies the target, the position is
    /// unchanged. Chunks whose whole range lies before the target are skipped
    /// without being decoded. Returns true iff a sample is current.
    pub fn seek(&mut self, t: i64) -> bool {
        if self.error.is_some() {
            return false;
        }
        if let Some(sample) = self.sample {
            if sample.timestamp >= t {
                return true;
            }
        }

        // Never step back over something already yielded
        let target = if self.last_timestamp == i64::MIN {
            t
        } else {
            t.max(self.last_timestamp.saturating_add(1))
        };

        while self.current < self.chunks.len() {
            if self.chunks[self.current].max_time < target {
                self.current += 1;
                continue;
            }

            let cursor = match self.cursor(self.current) {
                Ok(cursor) => cursor,
                Err(err) => {
                    self.fail(err);
                    return false;
                }
            };

            if let Some(sample) = cursor.seek(target) {
                self.last_timestamp = sample.timestamp;
                self.sample = Some(sample);
                return true;
            }

            self.current += 1;
        }

        self.sample = None;
        false
    }

    /// The current sample
    ///
    /// Only meaningful when the preceding `next`/`seek` returned true.
    pub fn at(&self) -> Option<Sample> {
        self.sample
    }

    /// The terminal error, if merging failed
    pub fn err(&self) -> Option<&MergeError> {
        self.error.as_ref()
    }

    /// Drain the iterator into a sample vector
    ///
    /// Returns the merge error instead if any chunk fails to decode along the
    /// way.
    pub fn collect_samples(mut self) -> Result<Vec<Sample>, MergeError> {
        let mut samples = Vec::new();
        while self.next() {
            if let Some(sample) = self.at() {
                samples.push(sample);
            }
        }
        match self.error {
            Some(err) => Err(err),
            None => Ok(samples),
        }
    }

    fn cursor(&mut self, idx: usize) -> Result<&mut ChunkCursor, MergeError> {
        let slot = &mut self.cursors[idx];
        if slot.is_none() {
            let samples = self.chunks[idx].decode().map_err(|reason| {
                MergeError::ChunkDecode {
                    labels: self.labels.clone(),
                    reason,
                }
            })?;
            *slot = Some(ChunkCursor::new(samples));
        }
        Ok(slot.as_mut().expect("cursor opened above"))
    }

    fn fail(&mut self, err: MergeError) {
        self.error = Some(err);
        self.sample = None;
        // Terminal: no chunk after a corrupt one is served
        self.current = self.chunks.len();
    }
}

/// Decoded view of one chunk with a consume position
struct ChunkCursor {
    samples: Vec<Sample>,
    pos: usize,
}

impl ChunkCursor {
    fn new(samples: Vec<Sample>) -> Self {
        Self { samples, pos: 0 }
    }

    fn next(&mut self) -> Option<Sample> {
        let sample = self.samples.get(self.pos).copied();
        if sample.is_some() {
            self.pos += 1;
        }
        sample
    }

    fn seek(&mut self, t: i64) -> Option<Sample> {
        // Samples are time-sorted; never moves backwards past consumed ones
        let offset = self.samples[self.pos..].partition_point(|s| s.timestamp < t);
        self.pos += offset;
        self.next()
    }
}
