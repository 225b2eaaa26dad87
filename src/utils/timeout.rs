//! Deadlines for async operations
//!
//! Connection opening and liveness probes are each bounded by a deadline;
//! this keeps the "timed out" and "failed" outcomes apart without nesting
//! `Result`s at every call site.

use std::future::Future;
use std::time::Duration;

/// Run `future` with a deadline
///
/// When the deadline passes the future is dropped and
/// `TimeoutError::Timeout(timeout)` is returned.
pub async fn with_timeout<T, E>(
    timeout: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, TimeoutError<E>> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(TimeoutError::Inner),
        Err(_) => Err(TimeoutError::Timeout(timeout)),
    }
}

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::Timeout(_))
    }

    /// The operation's own error, if it finished in time
    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeoutError::Inner(e) => Some(e),
            TimeoutError::Timeout(_) => None,
        }
    }
}
