//! Outcome error of a retried operation.

use std::fmt;

/// Error returned by [`BackoffScheduler::run`](super::BackoffScheduler::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The last failure observed, surfaced unchanged. Either it was not
    /// retryable or the attempt budget ran out.
    Operation(E),
    /// The caller cancelled while a reattempt was pending.
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The wrapped operation error, if this is not a cancellation.
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(e) => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Operation(e) => write!(f, "{}", e),
            RetryError::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Operation(e) => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }
}
