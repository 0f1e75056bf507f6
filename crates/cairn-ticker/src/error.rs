//! Error types for the priority ticker.

use thiserror::Error;

/// Errors returned to callers that try to schedule work.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TickerError {
    /// The dispatcher has been shut down and no longer accepts jobs.
    #[error("priority ticker stopped")]
    Stopped,
}

/// Convenience alias for ticker results.
pub type TickerResult<T> = Result<T, TickerError>;
