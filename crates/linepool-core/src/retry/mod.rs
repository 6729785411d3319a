//! Retry and backoff.
//!
//! `RetryPolicy` holds the immutable parameters and makes the per-failure
//! decision; `BackoffScheduler` wraps an arbitrary async operation and
//! drives the attempt loop on an injected [`Clock`](crate::clock::Clock).
//! Only error kinds the policy lists explicitly are retried.

mod cancel;
mod error;
mod policy;
mod run;

pub use cancel::CancelToken;
pub use error::RetryError;
pub use policy::{
    PolicyError, RetryDecision, RetryPolicy, RetryPolicyBuilder, DEFAULT_FACTOR,
    DEFAULT_INITIAL_DELAY, DEFAULT_JITTER_FRACTION, DEFAULT_MAX_DELAY,
};
pub use run::BackoffScheduler;
