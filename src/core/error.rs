//! Typed failures for the rate fetch path.
//!
//! Store-layer failures never appear here: the orchestrator recovers them
//! internally by falling back to the upstream source.

use chrono::NaiveDate;
use thiserror::Error;

/// Failure of a single upstream range request.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("malformed upstream payload: {0}")]
    Payload(String),

    #[error("upstream request failed: {0}")]
    Transport(String),
}

/// Failure of a whole historical fetch. Upstream chunk failures abort the
/// operation and carry the failing chunk's position, so callers can report
/// which part of the range broke instead of showing a truncated series.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid date range: {from} is after {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },

    #[error("chunk {chunk}/{total} failed: {source}")]
    Upstream {
        chunk: usize,
        total: usize,
        #[source]
        source: SourceError,
    },

    #[error("fetch cancelled")]
    Cancelled,
}
