//! Error types for the query-execution core

use crate::types::Labels;
use thiserror::Error;

/// Main error type, classified for the caller
///
/// Requests always complete with either a fully merged result or exactly one
/// of these classifications; partial results are never surfaced.
#[derive(Error, Debug)]
pub enum Error {
    /// Client supplied unparseable or otherwise invalid input
    #[error("bad request: {0}")]
    BadData(String),

    /// The request (or a shard of it) was canceled
    #[error("query canceled: {0}")]
    Canceled(String),

    /// The request (or its shard fan-out) exceeded its deadline
    #[error("query timed out: {0}")]
    Timeout(String),

    /// The storage layer failed while serving a shard
    #[error("storage error: {0}")]
    Storage(String),

    /// Merge error
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Internal error (bug, unexpected state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error classifies as recoverable
    ///
    /// When several concurrent shard tasks fail, a recoverable classification
    /// takes precedence over a non-recoverable one when surfacing the
    /// aggregate failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Canceled(_) | Error::Timeout(_) | Error::Storage(_)
        )
    }
}

/// Series merge errors
///
/// Raised while merging chunk-level streams into a single series stream.
/// Terminal for the affected series within the request; never retried.
#[derive(Error, Debug)]
pub enum MergeError {
    /// A chunk payload could not be decoded
    #[error("cannot decode chunk for series {labels}: {reason}")]
    ChunkDecode {
        /// Identity of the series the corrupt chunk belongs to
        labels: Labels,
        /// What went wrong while decoding
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
